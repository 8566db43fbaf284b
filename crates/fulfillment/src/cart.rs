//! Cart reservation manager.
//!
//! Every cart mutation runs in one unit of work that couples the ledger
//! adjustment with the cart item write and the user's cart list update.

use std::sync::Arc;

use chrono::Duration;
use common::{CartItemId, Clock, ProductId, UserId};
use domain::{CartItem, Variant};
use serde::Serialize;
use store::{Store, UnitOfWork};

use crate::error::{FulfillmentError, Result};
use crate::ledger;

/// Default hold window for new reservations.
pub const DEFAULT_HOLD_WINDOW_SECS: i64 = 30 * 60;

/// Request to put a product into a cart.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub variant: Variant,
}

impl AddItem {
    /// Adds a single unit of a product.
    pub fn one(product_id: ProductId) -> Self {
        Self {
            product_id,
            quantity: 1,
            variant: Variant::default(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }
}

/// Result of adding to a cart.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub item: CartItem,
    /// False when an existing line was incremented.
    pub created: bool,
}

/// A cart line as shown to the shopper, checked against the live catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CartEntry {
    pub item: CartItem,
    pub product_exists: bool,
    pub product_out_of_stock: bool,
}

/// Owns the per-user cart and its stock holds.
#[derive(Clone)]
pub struct CartManager<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    hold_window: Duration,
}

impl<S: Store> CartManager<S> {
    /// Creates a cart manager holding stock for `hold_window`.
    pub fn new(store: S, clock: Arc<dyn Clock>, hold_window: Duration) -> Self {
        Self {
            store,
            clock,
            hold_window,
        }
    }

    /// Adds units to the user's cart, holding stock for them.
    ///
    /// An existing line with the same product and variant is incremented;
    /// if that line had lost its hold, the whole new quantity is held again.
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_item(&self, user_id: UserId, request: AddItem) -> Result<AddOutcome> {
        if request.quantity == 0 {
            return Err(FulfillmentError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now();
        let deadline = now + self.hold_window;
        let product_id = request.product_id;

        let mut tx = self.store.begin().await?;
        tx.lock_user(user_id)
            .await?
            .ok_or(FulfillmentError::UserNotFound(user_id))?;

        let existing = tx
            .lock_matching_cart_item(user_id, product_id, &request.variant)
            .await?;

        let outcome = match existing {
            Some(mut item) => {
                let quantity = item.quantity.checked_add(request.quantity).ok_or_else(|| {
                    FulfillmentError::Validation("quantity is too large".to_string())
                })?;
                let hold = if item.is_reserved() {
                    request.quantity
                } else {
                    quantity
                };

                hold_stock(&mut tx, product_id, hold).await?;
                item.set_quantity(quantity)?;
                item.hold_until(deadline);
                tx.save_cart_item(&item).await?;
                tx.push_cart_entry(user_id, item.id).await?;
                AddOutcome {
                    item,
                    created: false,
                }
            }
            None => {
                let product = self
                    .store
                    .get_product(product_id)
                    .await?
                    .ok_or(FulfillmentError::ProductNotFound(product_id))?;

                hold_stock(&mut tx, product_id, request.quantity).await?;
                let item = CartItem::reserved(
                    user_id,
                    &product,
                    request.quantity,
                    request.variant,
                    deadline,
                    now,
                )?;
                tx.save_cart_item(&item).await?;
                tx.push_cart_entry(user_id, item.id).await?;
                AddOutcome {
                    item,
                    created: true,
                }
            }
        };

        tx.commit().await?;

        metrics::counter!("cart_items_added_total").increment(1);
        tracing::info!(
            cart_item_id = %outcome.item.id,
            created = outcome.created,
            "cart item reserved"
        );
        Ok(outcome)
    }

    /// Sets a cart line's quantity, moving the difference through the ledger.
    ///
    /// A line that lost its hold takes a fresh hold for the full quantity.
    #[tracing::instrument(skip(self))]
    pub async fn modify_quantity(
        &self,
        user_id: UserId,
        cart_item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(FulfillmentError::Validation(
                "quantity must be at least 1; remove the item instead".to_string(),
            ));
        }

        let deadline = self.clock.now() + self.hold_window;

        let mut tx = self.store.begin().await?;
        let mut item = lock_owned_item(&mut tx, user_id, cart_item_id).await?;

        let held = item.held_quantity();
        let delta = i64::from(held) - i64::from(quantity);
        if delta != 0 {
            ledger::try_adjust(&mut tx, item.product_id, delta)
                .await
                .map_err(|err| match err {
                    FulfillmentError::InsufficientStock {
                        product_id,
                        available,
                        ..
                    } => FulfillmentError::InsufficientStock {
                        product_id,
                        requested: quantity,
                        available: available.saturating_add(held),
                    },
                    other => other,
                })?;
        }

        item.set_quantity(quantity)?;
        item.hold_until(deadline);
        tx.save_cart_item(&item).await?;
        tx.commit().await?;

        tracing::info!(quantity, "cart item quantity changed");
        Ok(item)
    }

    /// Removes a line from the cart, releasing its hold if it has one.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, user_id: UserId, cart_item_id: CartItemId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let mut item = lock_owned_item(&mut tx, user_id, cart_item_id).await?;

        let released = item.release();
        if released > 0 {
            ledger::try_adjust(&mut tx, item.product_id, i64::from(released)).await?;
        }
        tx.delete_cart_item(cart_item_id).await?;
        tx.pull_cart_entry(user_id, cart_item_id).await?;
        tx.commit().await?;

        metrics::counter!("cart_items_removed_total").increment(1);
        tracing::info!(released, "cart item removed");
        Ok(())
    }

    /// Returns the user's cart checked against the live catalog.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(FulfillmentError::UserNotFound(user_id))?;

        let items = self.store.get_cart_items(&user.cart).await?;
        let mut entries = Vec::with_capacity(items.len());
        for mut item in items {
            let entry = match self.store.get_product(item.product_id).await? {
                Some(product) => {
                    item.refresh_snapshot(&product);
                    let product_out_of_stock =
                        !item.is_reserved() && item.quantity > product.available_stock;
                    CartEntry {
                        item,
                        product_exists: true,
                        product_out_of_stock,
                    }
                }
                None => CartEntry {
                    item,
                    product_exists: false,
                    product_out_of_stock: false,
                },
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Number of lines in the user's cart.
    pub async fn cart_count(&self, user_id: UserId) -> Result<usize> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(FulfillmentError::UserNotFound(user_id))?;
        Ok(user.cart.len())
    }

    /// Returns one of the user's cart lines.
    pub async fn get_item(&self, user_id: UserId, cart_item_id: CartItemId) -> Result<CartItem> {
        self.store
            .get_cart_item(cart_item_id)
            .await?
            .filter(|item| item.user_id == user_id)
            .ok_or(FulfillmentError::CartItemNotFound(cart_item_id))
    }
}

/// Takes a new hold, reporting a refusal as `OutOfStock`.
async fn hold_stock<T: UnitOfWork>(tx: &mut T, product_id: ProductId, units: u32) -> Result<()> {
    match ledger::try_adjust(tx, product_id, -i64::from(units)).await {
        Ok(_) => Ok(()),
        Err(FulfillmentError::InsufficientStock { available, .. }) => {
            tracing::warn!(%product_id, requested = units, available, "out of stock");
            Err(FulfillmentError::OutOfStock {
                product_id,
                requested: units,
                available,
            })
        }
        Err(err) => Err(err),
    }
}

/// Locks the user, then the cart item, and checks ownership.
async fn lock_owned_item<T: UnitOfWork>(
    tx: &mut T,
    user_id: UserId,
    cart_item_id: CartItemId,
) -> Result<CartItem> {
    tx.lock_user(user_id)
        .await?
        .ok_or(FulfillmentError::UserNotFound(user_id))?;

    tx.lock_cart_item(cart_item_id)
        .await?
        .filter(|item| item.user_id == user_id)
        .ok_or(FulfillmentError::CartItemNotFound(cart_item_id))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{ManualClock, Money};
    use domain::{Product, User};
    use store::InMemoryStore;

    use super::*;

    struct Fixture {
        store: InMemoryStore,
        clock: ManualClock,
        cart: CartManager<InMemoryStore>,
        product: Product,
        user: User,
    }

    async fn fixture(stock: u32) -> Fixture {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let product = Product::new("Widget", Money::from_cents(999), stock);
        let user = User::new("Ada", "ada@example.com");
        store.upsert_product(&product).await.unwrap();
        store.upsert_user(&user).await.unwrap();
        let cart = CartManager::new(
            store.clone(),
            Arc::new(clock.clone()),
            Duration::seconds(DEFAULT_HOLD_WINDOW_SECS),
        );
        Fixture {
            store,
            clock,
            cart,
            product,
            user,
        }
    }

    async fn stock(f: &Fixture) -> u32 {
        f.store
            .get_product(f.product.id)
            .await
            .unwrap()
            .unwrap()
            .available_stock
    }

    #[tokio::test]
    async fn add_creates_reserved_item_and_holds_stock() {
        let f = fixture(5).await;
        let outcome = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap();

        assert!(outcome.created);
        assert!(outcome.item.is_reserved());
        assert_eq!(
            outcome.item.reservation_deadline,
            Some(f.clock.now() + Duration::minutes(30))
        );
        assert_eq!(stock(&f).await, 3);

        let user = f.store.get_user(f.user.id).await.unwrap().unwrap();
        assert_eq!(user.cart, vec![outcome.item.id]);
    }

    #[tokio::test]
    async fn add_same_product_increments_existing_line() {
        let f = fixture(5).await;
        let first = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id))
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(10));
        let second = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.item.id, first.item.id);
        assert_eq!(second.item.quantity, 2);
        assert_eq!(
            second.item.reservation_deadline,
            Some(f.clock.now() + Duration::minutes(30))
        );
        assert_eq!(stock(&f).await, 3);
        assert_eq!(f.cart.cart_count(f.user.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn different_variant_gets_its_own_line() {
        let f = fixture(5).await;
        let red = Variant::new(Some("M".into()), Some("red".into()));
        let blue = Variant::new(Some("M".into()), Some("blue".into()));

        f.cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_variant(red))
            .await
            .unwrap();
        let outcome = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_variant(blue))
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(f.cart.cart_count(f.user.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn add_beyond_stock_fails_without_side_effects() {
        let f = fixture(1).await;
        let err = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::OutOfStock { requested: 2, available: 1, .. }
        ));
        assert_eq!(stock(&f).await, 1);
        assert_eq!(f.store.cart_item_count().await, 0);
        assert_eq!(f.cart.cart_count(f.user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_validates_inputs() {
        let f = fixture(1).await;

        let err = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let err = f
            .cart
            .add_item(UserId::new(), AddItem::one(f.product.id))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::UserNotFound(_)));

        let err = f
            .cart
            .add_item(f.user.id, AddItem::one(ProductId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn add_to_released_line_reacquires_full_hold() {
        let f = fixture(5).await;
        let outcome = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap();

        let mut tx = f.store.begin().await.unwrap();
        let mut item = tx.lock_cart_item(outcome.item.id).await.unwrap().unwrap();
        let released = item.release();
        tx.adjust_stock(f.product.id, i64::from(released)).await.unwrap();
        tx.save_cart_item(&item).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(stock(&f).await, 5);

        let again = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id))
            .await
            .unwrap();
        assert!(again.item.is_reserved());
        assert_eq!(again.item.quantity, 3);
        assert_eq!(stock(&f).await, 2);
    }

    #[tokio::test]
    async fn modify_moves_delta_through_ledger() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap()
            .item;

        let grown = f
            .cart
            .modify_quantity(f.user.id, item.id, 4)
            .await
            .unwrap();
        assert_eq!(grown.quantity, 4);
        assert_eq!(stock(&f).await, 1);

        let shrunk = f
            .cart
            .modify_quantity(f.user.id, item.id, 1)
            .await
            .unwrap();
        assert_eq!(shrunk.quantity, 1);
        assert_eq!(stock(&f).await, 4);
    }

    #[tokio::test]
    async fn modify_beyond_available_plus_held_is_refused() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap()
            .item;

        let err = f
            .cart
            .modify_quantity(f.user.id, item.id, 6)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock { requested: 6, available: 5, .. }
        ));
        assert_eq!(stock(&f).await, 3);

        let stored = f.store.get_cart_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 2);
    }

    #[tokio::test]
    async fn modify_to_zero_is_a_validation_error() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id))
            .await
            .unwrap()
            .item;

        let err = f
            .cart
            .modify_quantity(f.user.id, item.id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    #[tokio::test]
    async fn remove_releases_hold_and_pulls_from_cart() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(3))
            .await
            .unwrap()
            .item;
        assert_eq!(stock(&f).await, 2);

        f.cart.remove_item(f.user.id, item.id).await.unwrap();

        assert_eq!(stock(&f).await, 5);
        assert!(f.store.get_cart_item(item.id).await.unwrap().is_none());
        assert_eq!(f.cart.cart_count(f.user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_someone_elses_item_is_not_found() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id))
            .await
            .unwrap()
            .item;

        let intruder = User::new("Eve", "eve@example.com");
        f.store.upsert_user(&intruder).await.unwrap();

        let err = f.cart.remove_item(intruder.id, item.id).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::CartItemNotFound(id) if id == item.id));
        assert_eq!(stock(&f).await, 4);

        let err = f.cart.get_item(intruder.id, item.id).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::CartItemNotFound(_)));
    }

    #[tokio::test]
    async fn cart_view_flags_catalog_state() {
        let f = fixture(5).await;
        let item = f
            .cart
            .add_item(f.user.id, AddItem::one(f.product.id).with_quantity(2))
            .await
            .unwrap()
            .item;

        let mut renamed = f.store.get_product(f.product.id).await.unwrap().unwrap();
        renamed.name = "Widget v2".to_string();
        renamed.available_stock = 0;
        f.store.upsert_product(&renamed).await.unwrap();

        let entries = f.cart.get_cart(f.user.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].product_exists);
        // Reserved lines already hold their units.
        assert!(!entries[0].product_out_of_stock);
        assert_eq!(entries[0].item.snapshot.name, "Widget v2");

        let stored = f.cart.get_item(f.user.id, item.id).await.unwrap();
        assert_eq!(stored.snapshot.name, "Widget");
    }
}
