use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, OrderId, PaymentId, ProductId, UserId};
use domain::{CartItem, Order, Product, User, Variant};

use crate::Result;

/// Entry point to persistence.
///
/// Read methods see committed state only and take no locks. Anything that
/// mutates must go through [`Store::begin`].
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// The transaction type handed out by [`Store::begin`].
    type Tx: UnitOfWork;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Retrieves a product.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Retrieves a user.
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Retrieves a cart item.
    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>>;

    /// Retrieves cart items in the order given. Missing ids are skipped.
    async fn get_cart_items(&self, ids: &[CartItemId]) -> Result<Vec<CartItem>>;

    /// Returns up to `limit` reserved cart items whose deadline is at or
    /// before `now`, oldest deadline first.
    async fn find_expired_holds(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<CartItemId>>;

    /// Total units currently held by reserved cart items for a product.
    async fn reserved_quantity(&self, product_id: ProductId) -> Result<u64>;

    /// Retrieves an order.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Retrieves the order created for a payment, if any.
    async fn find_order_by_payment(&self, payment_id: &PaymentId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Inserts or replaces a catalog product.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    /// Inserts or replaces a user.
    async fn upsert_user(&self, user: &User) -> Result<()>;
}

/// A transaction over the store.
///
/// Every `lock_*` method blocks until it holds the row and returns the
/// latest committed value. Locks are released on commit or rollback.
/// Dropping a unit of work without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Conditionally adjusts available stock by `delta`.
    ///
    /// Fails with `InsufficientStock` if the result would be negative and
    /// leaves the stock untouched. Returns the new available stock.
    async fn adjust_stock(&mut self, product_id: ProductId, delta: i64) -> Result<u32>;

    /// Locks and returns a user.
    async fn lock_user(&mut self, id: UserId) -> Result<Option<User>>;

    /// Locks and returns a cart item.
    async fn lock_cart_item(&mut self, id: CartItemId) -> Result<Option<CartItem>>;

    /// Locks and returns the user's cart item for a product and variant.
    async fn lock_matching_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
        variant: &Variant,
    ) -> Result<Option<CartItem>>;

    /// Inserts or updates a cart item.
    async fn save_cart_item(&mut self, item: &CartItem) -> Result<()>;

    /// Deletes a cart item. Returns false if it did not exist.
    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<bool>;

    /// Appends a cart item id to the user's cart if not already present.
    async fn push_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()>;

    /// Removes a cart item id from the user's cart.
    async fn pull_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()>;

    /// Records the payment provider's customer id on a user.
    async fn set_payment_customer(&mut self, user_id: UserId, customer_id: &str) -> Result<()>;

    /// Serializes all work on a payment id and returns its existing order.
    async fn lock_payment(&mut self, payment_id: &PaymentId) -> Result<Option<Order>>;

    /// Inserts a new order. Fails with `DuplicatePayment` if one exists.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Locks and returns an order.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Persists an order's status changes.
    async fn update_order(&mut self, order: &Order) -> Result<()>;

    /// Applies all writes atomically and releases locks.
    async fn commit(self) -> Result<()>;

    /// Discards all writes and releases locks.
    async fn rollback(self) -> Result<()>;
}
