//! Order fulfillment service.
//!
//! Converts a confirmed payment into an order in one unit of work. The
//! payment id is the idempotency key: a redelivered confirmation returns the
//! order created by the first delivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use common::{CartItemId, Clock, OrderId, PaymentId, ProductId, UserId};
use domain::{CartItem, Order, User};
use serde::Serialize;
use store::{Store, StoreError, UnitOfWork};

use crate::error::{FulfillmentError, Result};
use crate::ledger;
use crate::notify::{Notifier, OrderConfirmation};
use crate::payment::PaymentConfirmed;

/// Result of processing a payment confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentOutcome {
    pub order: Order,
    /// False when the payment had already been converted.
    pub created: bool,
}

enum Conversion {
    Created(Order, User),
    Existing(Order),
}

/// Turns confirmed payments into orders and manages their lifecycle.
pub struct OrderFulfillment<S, N>
where
    S: Store,
    N: Notifier,
{
    store: S,
    notifier: N,
    clock: Arc<dyn Clock>,
}

impl<S, N> OrderFulfillment<S, N>
where
    S: Store,
    N: Notifier,
{
    pub fn new(store: S, notifier: N, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Converts a confirmed payment into an order.
    ///
    /// Stock is only adjusted by the difference between what the consumed
    /// cart items held and what was paid for, so a fully reserved cart
    /// leaves the ledger untouched. Any failure aborts the whole order.
    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id, user_id = %event.user_id))]
    pub async fn fulfill(&self, event: PaymentConfirmed) -> Result<FulfillmentOutcome> {
        if let Some(order) = self.store.find_order_by_payment(&event.payment_id).await? {
            return Ok(duplicate(order));
        }

        match self.convert(&event).await? {
            Conversion::Existing(order) => Ok(duplicate(order)),
            Conversion::Created(order, user) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    total = %order.total_price(),
                    items = order.items().len(),
                    "order created"
                );
                self.notify(&order, &user).await;
                Ok(FulfillmentOutcome {
                    order,
                    created: true,
                })
            }
        }
    }

    async fn convert(&self, event: &PaymentConfirmed) -> Result<Conversion> {
        for line in &event.lines {
            if line.quantity == 0 {
                return Err(FulfillmentError::Validation(format!(
                    "paid line for product {} has zero quantity",
                    line.product_id
                )));
            }
        }

        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx.lock_payment(&event.payment_id).await? {
            return Ok(Conversion::Existing(existing));
        }

        let user = tx
            .lock_user(event.user_id)
            .await?
            .ok_or(FulfillmentError::UserNotFound(event.user_id))?;

        let mut cart_item_ids: Vec<CartItemId> =
            event.lines.iter().filter_map(|line| line.cart_item_id).collect();
        cart_item_ids.sort();
        cart_item_ids.dedup();

        let mut cart_items: HashMap<CartItemId, CartItem> = HashMap::new();
        for id in cart_item_ids {
            match tx.lock_cart_item(id).await? {
                Some(item) if item.user_id == event.user_id => {
                    cart_items.insert(id, item);
                }
                _ => {}
            }
        }

        // Each paid line consumes at most one cart item. A line without one
        // (already consumed, or never carted) buys straight from stock.
        let mut deltas: BTreeMap<ProductId, i64> = BTreeMap::new();
        let mut consumed = Vec::new();
        for line in &event.lines {
            let held = match line.cart_item_id.and_then(|id| cart_items.remove(&id)) {
                Some(item) if item.product_id == line.product_id => {
                    let held = item.held_quantity();
                    consumed.push(item.id);
                    held
                }
                _ => 0,
            };
            *deltas.entry(line.product_id).or_default() +=
                i64::from(held) - i64::from(line.quantity);
        }

        for (product_id, delta) in deltas {
            if delta == 0 {
                continue;
            }
            match ledger::try_adjust(&mut tx, product_id, delta).await {
                Ok(_) => {}
                Err(FulfillmentError::InsufficientStock { available, .. }) => {
                    let requested = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
                    tracing::warn!(%product_id, requested, available, "paid order exceeds stock");
                    return Err(FulfillmentError::OutOfStock {
                        product_id,
                        requested,
                        available,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let order = Order::place(
            event.user_id,
            event.payment_id.clone(),
            event.lines.iter().map(|line| line.to_order_line()).collect(),
            event.amount_total,
            event.shipping.clone(),
            self.clock.now(),
        )?;

        for id in consumed {
            tx.delete_cart_item(id).await?;
            tx.pull_cart_entry(user.id, id).await?;
        }

        if let (None, Some(customer_id)) = (&user.payment_customer_id, &event.customer_id) {
            tx.set_payment_customer(user.id, customer_id).await?;
        }

        match tx.insert_order(&order).await {
            Ok(()) => {}
            Err(StoreError::DuplicatePayment(_)) => {
                drop(tx);
                return self.existing(&event.payment_id).await;
            }
            Err(err) => return Err(err.into()),
        }
        match tx.commit().await {
            Ok(()) => Ok(Conversion::Created(order, user)),
            Err(StoreError::DuplicatePayment(_)) => self.existing(&event.payment_id).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Loads the order a concurrent delivery committed first.
    async fn existing(&self, payment_id: &PaymentId) -> Result<Conversion> {
        self.store
            .find_order_by_payment(payment_id)
            .await?
            .map(Conversion::Existing)
            .ok_or_else(|| {
                FulfillmentError::Internal(format!(
                    "payment {payment_id} reported as duplicate but no order exists"
                ))
            })
    }

    async fn notify(&self, order: &Order, user: &User) {
        let message = OrderConfirmation::for_order(order, user);
        if let Err(err) = self.notifier.send(message).await {
            metrics::counter!("notifications_failed_total").increment(1);
            tracing::warn!(order_id = %order.id(), error = %err, "order confirmation not sent");
        }
    }

    /// Cancels an order and returns its quantities to stock.
    ///
    /// Products that have since left the catalog are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        order.cancel(self.clock.now())?;

        let mut restock: BTreeMap<ProductId, i64> = BTreeMap::new();
        for line in order.items() {
            *restock.entry(line.product_id).or_default() += i64::from(line.quantity);
        }
        for (product_id, units) in restock {
            match ledger::try_adjust(&mut tx, product_id, units).await {
                Ok(_) => {}
                Err(FulfillmentError::ProductNotFound(_)) => {
                    tracing::warn!(%product_id, units, "restock skipped for missing product");
                }
                Err(err) => return Err(err),
            }
        }

        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(%order_id, "order cancelled");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    /// Lists a user's orders, newest first.
    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(FulfillmentError::UserNotFound(user_id));
        }
        Ok(self.store.list_orders_for_user(user_id).await?)
    }
}

fn duplicate(order: Order) -> FulfillmentOutcome {
    metrics::counter!("orders_duplicate_payment_total").increment(1);
    tracing::info!(order_id = %order.id(), "payment already fulfilled");
    FulfillmentOutcome {
        order,
        created: false,
    }
}
