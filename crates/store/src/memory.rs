use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, OrderId, PaymentId, ProductId, UserId};
use domain::{CartItem, Order, Product, User, Variant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{Store, UnitOfWork},
};

#[derive(Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    users: HashMap<UserId, User>,
    cart_items: HashMap<CartItemId, CartItem>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, OrderId>,
}

/// Row identity for the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Payment(PaymentId),
    User(UserId),
    CartItem(CartItemId),
    Order(OrderId),
    Product(ProductId),
}

/// Row locks currently held or awaited. Entries are evicted once the last
/// transaction interested in the row lets go.
type LockTable = std::sync::Mutex<HashMap<LockKey, Arc<Mutex<()>>>>;

/// In-memory store implementation for testing.
///
/// Each row has its own async mutex that a transaction holds until it
/// commits or rolls back, so concurrent transactions behave like
/// `SELECT ... FOR UPDATE` against the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of stored cart items.
    pub async fn cart_item_count(&self) -> usize {
        self.tables.read().await.cart_items.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        Ok(InMemoryTx {
            tables: Arc::clone(&self.tables),
            locks: Arc::clone(&self.locks),
            held: HashMap::new(),
            stock: HashMap::new(),
            users: HashMap::new(),
            cart_items: HashMap::new(),
            orders: HashMap::new(),
            inserted_orders: HashSet::new(),
        })
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        Ok(self.tables.read().await.cart_items.get(&id).cloned())
    }

    async fn get_cart_items(&self, ids: &[CartItemId]) -> Result<Vec<CartItem>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.cart_items.get(id).cloned())
            .collect())
    }

    async fn find_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CartItemId>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<_> = tables
            .cart_items
            .values()
            .filter(|item| item.is_expired(now))
            .collect();
        expired.sort_by_key(|item| item.reservation_deadline);
        Ok(expired.into_iter().take(limit).map(|item| item.id).collect())
    }

    async fn reserved_quantity(&self, product_id: ProductId) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .cart_items
            .values()
            .filter(|item| item.product_id == product_id)
            .map(|item| u64::from(item.held_quantity()))
            .sum())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_payment(&self, payment_id: &PaymentId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .get(payment_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|order| order.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|order| std::cmp::Reverse(order.created_at()));
        Ok(orders)
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.acquire(LockKey::Product(product.id)).await;
        self.tables
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        tx.rollback().await
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.acquire(LockKey::User(user.id)).await;
        self.tables
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        tx.rollback().await
    }
}

/// A unit of work against [`InMemoryStore`].
///
/// Writes are buffered per row and applied under the table write lock on
/// commit, before any row lock is released.
pub struct InMemoryTx {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
    held: HashMap<LockKey, OwnedMutexGuard<()>>,
    stock: HashMap<ProductId, u32>,
    users: HashMap<UserId, User>,
    // `None` marks a deletion.
    cart_items: HashMap<CartItemId, Option<CartItem>>,
    orders: HashMap<OrderId, Order>,
    inserted_orders: HashSet<OrderId>,
}

impl InMemoryTx {
    async fn acquire(&mut self, key: LockKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let row = {
            let mut table = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(table.entry(key.clone()).or_default())
        };
        let guard = row.lock_owned().await;
        self.held.insert(key, guard);
    }

    async fn current_user(&self, id: UserId) -> Option<User> {
        match self.users.get(&id) {
            Some(user) => Some(user.clone()),
            None => self.tables.read().await.users.get(&id).cloned(),
        }
    }

    async fn current_cart_item(&self, id: CartItemId) -> Option<CartItem> {
        match self.cart_items.get(&id) {
            Some(entry) => entry.clone(),
            None => self.tables.read().await.cart_items.get(&id).cloned(),
        }
    }

    async fn current_order(&self, id: OrderId) -> Option<Order> {
        match self.orders.get(&id) {
            Some(order) => Some(order.clone()),
            None => self.tables.read().await.orders.get(&id).cloned(),
        }
    }

    async fn user_mut(&mut self, id: UserId) -> Result<&mut User> {
        self.acquire(LockKey::User(id)).await;
        if !self.users.contains_key(&id) {
            let user = self
                .tables
                .read()
                .await
                .users
                .get(&id)
                .cloned()
                .ok_or(StoreError::UserNotFound(id))?;
            self.users.insert(id, user);
        }
        self.users.get_mut(&id).ok_or(StoreError::UserNotFound(id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryTx {
    async fn adjust_stock(&mut self, product_id: ProductId, delta: i64) -> Result<u32> {
        self.acquire(LockKey::Product(product_id)).await;

        let current = match self.stock.get(&product_id) {
            Some(stock) => *stock,
            None => self
                .tables
                .read()
                .await
                .products
                .get(&product_id)
                .map(|product| product.available_stock)
                .ok_or(StoreError::ProductNotFound(product_id))?,
        };

        let next = i64::from(current) + delta;
        if next < 0 {
            return Err(StoreError::InsufficientStock {
                product_id,
                available: current,
                delta,
            });
        }
        let next = u32::try_from(next).map_err(|_| StoreError::StockOverflow(product_id))?;

        self.stock.insert(product_id, next);
        Ok(next)
    }

    async fn lock_user(&mut self, id: UserId) -> Result<Option<User>> {
        self.acquire(LockKey::User(id)).await;
        Ok(self.current_user(id).await)
    }

    async fn lock_cart_item(&mut self, id: CartItemId) -> Result<Option<CartItem>> {
        self.acquire(LockKey::CartItem(id)).await;
        Ok(self.current_cart_item(id).await)
    }

    async fn lock_matching_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
        variant: &Variant,
    ) -> Result<Option<CartItem>> {
        let matches = |item: &CartItem| {
            item.user_id == user_id && item.product_id == product_id && &item.variant == variant
        };

        let found = {
            let tables = self.tables.read().await;
            let buffered = self.cart_items.values().flatten().filter(|&item| matches(item));
            let committed = tables
                .cart_items
                .values()
                .filter(|item| !self.cart_items.contains_key(&item.id))
                .filter(|&item| matches(item));
            buffered
                .chain(committed)
                .min_by_key(|item| item.created_at)
                .map(|item| item.id)
        };

        match found {
            Some(id) => self.lock_cart_item(id).await,
            None => Ok(None),
        }
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> Result<()> {
        self.acquire(LockKey::CartItem(item.id)).await;
        self.cart_items.insert(item.id, Some(item.clone()));
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<bool> {
        self.acquire(LockKey::CartItem(id)).await;
        let existed = self.current_cart_item(id).await.is_some();
        self.cart_items.insert(id, None);
        Ok(existed)
    }

    async fn push_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()> {
        self.user_mut(user_id).await?.push_cart(item_id);
        Ok(())
    }

    async fn pull_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()> {
        self.user_mut(user_id).await?.pull_cart(item_id);
        Ok(())
    }

    async fn set_payment_customer(&mut self, user_id: UserId, customer_id: &str) -> Result<()> {
        self.user_mut(user_id).await?.payment_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn lock_payment(&mut self, payment_id: &PaymentId) -> Result<Option<Order>> {
        self.acquire(LockKey::Payment(payment_id.clone())).await;

        if let Some(order) = self
            .orders
            .values()
            .find(|order| order.payment_id() == payment_id)
        {
            return Ok(Some(order.clone()));
        }

        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .get(payment_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let duplicate = self
            .orders
            .values()
            .any(|existing| existing.payment_id() == order.payment_id());
        if duplicate {
            return Err(StoreError::DuplicatePayment(order.payment_id().clone()));
        }

        self.acquire(LockKey::Order(order.id())).await;
        self.orders.insert(order.id(), order.clone());
        self.inserted_orders.insert(order.id());
        Ok(())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.acquire(LockKey::Order(id)).await;
        Ok(self.current_order(id).await)
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        self.acquire(LockKey::Order(order.id())).await;
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let tables = Arc::clone(&self.tables);
        let mut tables = tables.write().await;

        // Validate before applying anything so a failed commit writes nothing.
        for id in &self.inserted_orders {
            if let Some(order) = self.orders.get(id)
                && tables.payments.contains_key(order.payment_id())
            {
                return Err(StoreError::DuplicatePayment(order.payment_id().clone()));
            }
        }

        for (product_id, stock) in std::mem::take(&mut self.stock) {
            if let Some(product) = tables.products.get_mut(&product_id) {
                product.available_stock = stock;
            }
        }
        for (id, user) in std::mem::take(&mut self.users) {
            tables.users.insert(id, user);
        }
        for (id, entry) in std::mem::take(&mut self.cart_items) {
            match entry {
                Some(item) => {
                    tables.cart_items.insert(id, item);
                }
                None => {
                    tables.cart_items.remove(&id);
                }
            }
        }
        for (id, order) in std::mem::take(&mut self.orders) {
            tables.payments.insert(order.payment_id().clone(), id);
            tables.orders.insert(id, order);
        }

        drop(tables);
        drop(self);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let keys: Vec<LockKey> = self.held.drain().map(|(key, _guard)| key).collect();

        let mut table = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            // Waiters clone the row under the table lock, so a count of one
            // means no other transaction holds or awaits it.
            if table.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                table.remove(&key);
            }
        }
    }
}
