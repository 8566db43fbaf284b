//! End-to-end consistency scenarios across cart, sweeper, checkout and
//! fulfillment, run against the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Clock, ManualClock, Money, ProductId, UserId};
use domain::{OrderStatus, Product, ShippingDetails, User, Variant};
use fulfillment::{
    AddItem, CartManager, CheckoutOrchestrator, CheckoutUrls, DEFAULT_HOLD_WINDOW_SECS,
    FulfillmentError, InMemoryNotifier, InMemoryPaymentGateway, InventoryLedger,
    OrderFulfillment, ReservationSweeper, SweeperConfig,
};
use store::{InMemoryStore, Store};

struct TestHarness {
    store: InMemoryStore,
    clock: ManualClock,
    gateway: InMemoryPaymentGateway,
    ledger: InventoryLedger<InMemoryStore>,
    cart: CartManager<InMemoryStore>,
    checkout: CheckoutOrchestrator<InMemoryStore, InMemoryPaymentGateway>,
    orders: OrderFulfillment<InMemoryStore, InMemoryNotifier>,
    sweeper: ReservationSweeper<InMemoryStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let gateway = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();

        Self {
            ledger: InventoryLedger::new(store.clone()),
            cart: CartManager::new(
                store.clone(),
                Arc::new(clock.clone()),
                Duration::seconds(DEFAULT_HOLD_WINDOW_SECS),
            ),
            checkout: CheckoutOrchestrator::new(
                store.clone(),
                gateway.clone(),
                CheckoutUrls::default(),
            ),
            orders: OrderFulfillment::new(store.clone(), notifier, Arc::new(clock.clone())),
            sweeper: ReservationSweeper::new(
                store.clone(),
                Arc::new(clock.clone()),
                SweeperConfig::default(),
            ),
            store,
            clock,
            gateway,
        }
    }

    async fn product(&self, stock: u32) -> ProductId {
        let product = Product::new("Widget", Money::from_cents(1500), stock);
        self.store.upsert_product(&product).await.unwrap();
        product.id
    }

    async fn user(&self) -> UserId {
        let user = User::new("Shopper", "shopper@example.com");
        self.store.upsert_user(&user).await.unwrap();
        user.id
    }

    async fn available(&self, product_id: ProductId) -> u32 {
        self.ledger.available(product_id).await.unwrap()
    }

    /// Available stock plus what reserved cart items hold.
    async fn baseline(&self, product_id: ProductId) -> u64 {
        self.ledger.stock_level(product_id).await.unwrap().baseline()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_concurrent_adds_of_two_against_five() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let user_id = h.user().await;
        let cart = h.cart.clone();
        handles.push(tokio::spawn(async move {
            cart.add_item(user_id, AddItem::one(product_id).with_quantity(2))
                .await
        }));
    }

    let mut succeeded = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(FulfillmentError::OutOfStock { .. }) => out_of_stock += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(out_of_stock, 1);
    assert_eq!(h.available(product_id).await, 1);
    assert_eq!(h.baseline(product_id).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_oversell_under_contention() {
    const STOCK: u32 = 7;
    const SHOPPERS: usize = 20;

    let h = TestHarness::new();
    let product_id = h.product(STOCK).await;

    let mut handles = Vec::new();
    for _ in 0..SHOPPERS {
        let user_id = h.user().await;
        let cart = h.cart.clone();
        handles.push(tokio::spawn(async move {
            cart.add_item(user_id, AddItem::one(product_id)).await
        }));
    }

    let mut succeeded = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) if err.is_stock_failure() => out_of_stock += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(succeeded, STOCK as usize);
    assert_eq!(out_of_stock, SHOPPERS - STOCK as usize);
    assert_eq!(h.available(product_id).await, 0);
    assert_eq!(h.baseline(product_id).await, u64::from(STOCK));
}

#[tokio::test]
async fn removing_a_reserved_item_restores_stock() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;
    let user_id = h.user().await;

    let item = h
        .cart
        .add_item(user_id, AddItem::one(product_id).with_quantity(3))
        .await
        .unwrap()
        .item;
    assert_eq!(h.available(product_id).await, 2);

    h.cart.remove_item(user_id, item.id).await.unwrap();

    assert_eq!(h.available(product_id).await, 5);
    assert_eq!(h.cart.cart_count(user_id).await.unwrap(), 0);
    assert!(h.store.get_cart_item(item.id).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_hold_is_released_by_one_tick() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;
    let user_id = h.user().await;

    let item = h
        .cart
        .add_item(user_id, AddItem::one(product_id).with_quantity(4))
        .await
        .unwrap()
        .item;

    h.clock.advance(Duration::minutes(29));
    assert_eq!(h.sweeper.sweep_once().await.unwrap().released, 0);
    assert_eq!(h.available(product_id).await, 1);

    h.clock.advance(Duration::minutes(2));
    assert_eq!(h.sweeper.sweep_once().await.unwrap().released, 1);

    let item = h.store.get_cart_item(item.id).await.unwrap().unwrap();
    assert!(!item.is_reserved());
    assert_eq!(item.reservation_deadline, None);
    assert_eq!(h.available(product_id).await, 5);
    assert_eq!(h.cart.cart_count(user_id).await.unwrap(), 1);
}

#[tokio::test]
async fn checkout_then_duplicate_confirmation_creates_one_order() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;
    let user_id = h.user().await;

    let item = h
        .cart
        .add_item(user_id, AddItem::one(product_id).with_quantity(2))
        .await
        .unwrap()
        .item;

    let session = h.checkout.begin_checkout(user_id, &[item.id]).await.unwrap();
    let confirmed = h
        .gateway
        .complete_session(&session.id, ShippingDetails::default())
        .unwrap();

    let first = h.orders.fulfill(confirmed.clone()).await.unwrap();
    let second = h.orders.fulfill(confirmed).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.order, second.order);
    assert_eq!(first.order.status(), OrderStatus::Processed);
    assert_eq!(first.order.total_price(), Money::from_cents(3000));

    assert_eq!(h.store.order_count().await, 1);
    assert!(h.store.get_cart_item(item.id).await.unwrap().is_none());
    assert_eq!(h.cart.cart_count(user_id).await.unwrap(), 0);
    assert_eq!(h.available(product_id).await, 3);
    assert_eq!(h.orders.list_orders_for_user(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expired_item_is_still_purchasable_from_stock() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;
    let user_id = h.user().await;

    let item = h
        .cart
        .add_item(user_id, AddItem::one(product_id).with_quantity(2))
        .await
        .unwrap()
        .item;
    let session = h.checkout.begin_checkout(user_id, &[item.id]).await.unwrap();

    // The hold lapses while the shopper is on the payment page.
    h.clock.advance(Duration::minutes(45));
    h.sweeper.sweep_once().await.unwrap();
    assert_eq!(h.available(product_id).await, 5);

    let confirmed = h
        .gateway
        .complete_session(&session.id, ShippingDetails::default())
        .unwrap();
    h.orders.fulfill(confirmed).await.unwrap();

    assert_eq!(h.available(product_id).await, 3);
    assert_eq!(h.baseline(product_id).await, 3);
}

#[tokio::test]
async fn conservation_holds_across_a_mixed_sequence() {
    let h = TestHarness::new();
    let product_id = h.product(10).await;
    let alice = h.user().await;
    let bob = h.user().await;
    let medium = Variant::new(Some("M".to_string()), None);

    let a = h
        .cart
        .add_item(alice, AddItem::one(product_id).with_quantity(3))
        .await
        .unwrap()
        .item;
    assert_eq!(h.baseline(product_id).await, 10);

    h.cart
        .add_item(alice, AddItem::one(product_id).with_variant(medium.clone()))
        .await
        .unwrap();
    assert_eq!(h.baseline(product_id).await, 10);

    let b = h
        .cart
        .add_item(bob, AddItem::one(product_id).with_quantity(2))
        .await
        .unwrap()
        .item;
    h.cart.modify_quantity(alice, a.id, 5).await.unwrap();
    assert_eq!(h.available(product_id).await, 2);
    assert_eq!(h.baseline(product_id).await, 10);

    h.clock.advance(Duration::minutes(31));
    h.sweeper.sweep_once().await.unwrap();
    assert_eq!(h.available(product_id).await, 10);
    assert_eq!(h.baseline(product_id).await, 10);

    // Re-holding an expired item goes back through the ledger.
    h.cart.modify_quantity(bob, b.id, 4).await.unwrap();
    assert_eq!(h.available(product_id).await, 6);
    assert_eq!(h.baseline(product_id).await, 10);

    h.cart.remove_item(alice, a.id).await.unwrap();
    assert_eq!(h.baseline(product_id).await, 10);

    // Only Bob's re-held item still holds stock, and its deadline is live.
    let mut reserved = Vec::new();
    for user_id in [alice, bob] {
        for entry in h.cart.get_cart(user_id).await.unwrap() {
            if entry.item.is_reserved() {
                reserved.push(entry.item);
            }
        }
    }
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].id, b.id);
    assert_eq!(reserved[0].held_quantity(), 4);
    assert!(reserved[0].reservation_deadline.is_some_and(|d| d > h.clock.now()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeper_racing_cart_and_fulfillment_conserves_stock() {
    const STOCK: u32 = 50;

    for _ in 0..25 {
        let h = Arc::new(TestHarness::new());
        let product_id = h.product(STOCK).await;
        let buyer = h.user().await;
        let browser = h.user().await;
        let latecomer = h.user().await;

        let bought = h
            .cart
            .add_item(buyer, AddItem::one(product_id).with_quantity(3))
            .await
            .unwrap()
            .item;
        let session = h.checkout.begin_checkout(buyer, &[bought.id]).await.unwrap();
        let confirmed = h
            .gateway
            .complete_session(&session.id, ShippingDetails::default())
            .unwrap();
        let browsed = h
            .cart
            .add_item(browser, AddItem::one(product_id).with_quantity(2))
            .await
            .unwrap()
            .item;

        // Both holds have lapsed when the racing work starts.
        h.clock.advance(Duration::minutes(45));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..2 {
            let h = Arc::clone(&h);
            tasks.spawn(async move { h.sweeper.sweep_once().await.map(|_| ()) });
        }
        for _ in 0..2 {
            let h = Arc::clone(&h);
            let confirmed = confirmed.clone();
            tasks.spawn(async move { h.orders.fulfill(confirmed).await.map(|_| ()) });
        }
        {
            let h = Arc::clone(&h);
            let browsed_id = browsed.id;
            tasks.spawn(async move {
                h.cart
                    .modify_quantity(browser, browsed_id, 4)
                    .await
                    .map(|_| ())
            });
        }
        {
            let h = Arc::clone(&h);
            tasks.spawn(async move {
                h.cart
                    .add_item(latecomer, AddItem::one(product_id))
                    .await
                    .map(|_| ())
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let sold: u64 = h
            .orders
            .list_orders_for_user(buyer)
            .await
            .unwrap()
            .iter()
            .filter(|order| order.status() != OrderStatus::Cancelled)
            .map(|order| u64::from(order.item_count()))
            .sum();
        let level = h.ledger.stock_level(product_id).await.unwrap();

        assert_eq!(sold, 3);
        assert_eq!(h.store.order_count().await, 1);
        assert_eq!(level.held, 5);
        assert_eq!(u64::from(level.available) + level.held + sold, u64::from(STOCK));
        assert!(h.store.get_cart_item(bought.id).await.unwrap().is_none());

        let browsed = h.store.get_cart_item(browsed.id).await.unwrap().unwrap();
        assert_eq!(browsed.held_quantity(), 4);
        assert!(browsed.reservation_deadline.is_some_and(|d| d > h.clock.now()));
    }
}

#[tokio::test]
async fn cancelled_order_returns_stock() {
    let h = TestHarness::new();
    let product_id = h.product(5).await;
    let user_id = h.user().await;

    let item = h
        .cart
        .add_item(user_id, AddItem::one(product_id).with_quantity(2))
        .await
        .unwrap()
        .item;
    let session = h.checkout.begin_checkout(user_id, &[item.id]).await.unwrap();
    let confirmed = h
        .gateway
        .complete_session(&session.id, ShippingDetails::default())
        .unwrap();
    let order = h.orders.fulfill(confirmed).await.unwrap().order;
    assert_eq!(h.available(product_id).await, 3);

    h.orders.cancel_order(order.id()).await.unwrap();
    assert_eq!(h.available(product_id).await, 5);
}
