//! Order confirmation notices.
//!
//! Delivery is best-effort: a failed notice is logged and counted, never
//! surfaced to the payment flow.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{Order, User};
use serde::Serialize;

use crate::error::{FulfillmentError, Result};

/// A rendered confirmation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OrderConfirmation {
    pub fn for_order(order: &Order, user: &User) -> Self {
        let mut body = format!("Hi {},\n\nThanks for your order {}.\n\n", user.name, order.id());
        for line in order.items() {
            body.push_str(&format!(
                "  {} x{}  {}\n",
                line.product_name,
                line.quantity,
                line.total_price()
            ));
        }
        body.push_str(&format!("\nSubtotal: {}\n", order.items_subtotal()));
        body.push_str(&format!("Total: {}\n", order.total_price()));

        let shipping = order.shipping();
        if !shipping.address.is_empty() {
            body.push_str(&format!(
                "Shipping to: {}, {} {}, {}\n",
                shipping.address, shipping.postal_code, shipping.city, shipping.country
            ));
        }

        Self {
            to: user.email.clone(),
            subject: format!("Order confirmation {}", order.id()),
            body,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, message: OrderConfirmation) -> Result<()>;
}

/// Writes notices to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: OrderConfirmation) -> Result<()> {
        tracing::info!(to = %message.to, subject = %message.subject, "order confirmation");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<OrderConfirmation>,
    should_fail: bool,
}

/// Records notices for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .should_fail = should_fail;
    }

    pub fn sent(&self) -> Vec<OrderConfirmation> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, message: OrderConfirmation) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.should_fail {
            return Err(FulfillmentError::Internal("mail relay unavailable".to_string()));
        }
        state.sent.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{Money, PaymentId};
    use domain::{CartItem, OrderLine, Product, ShippingDetails, Variant};

    use super::*;

    fn order_for(user: &User) -> Order {
        let product = Product::new("Widget", Money::from_cents(250), 10);
        let now = Utc::now();
        let item = CartItem::reserved(user.id, &product, 2, Variant::default(), now, now).unwrap();
        Order::place(
            user.id,
            PaymentId::from("cs_1"),
            vec![OrderLine::from_cart_item(&item, 2).unwrap()],
            Money::from_cents(500),
            ShippingDetails {
                address: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                postal_code: "12345".to_string(),
                country: "US".to_string(),
                phone: None,
            },
            now,
        )
        .unwrap()
    }

    #[test]
    fn confirmation_lists_lines_and_total() {
        let user = User::new("Ada", "ada@example.com");
        let order = order_for(&user);

        let message = OrderConfirmation::for_order(&order, &user);
        assert_eq!(message.to, "ada@example.com");
        assert!(message.subject.contains(&order.id().to_string()));
        assert!(message.body.contains("Widget x2"));
        assert!(message.body.contains(&format!("Subtotal: {}", order.items_subtotal())));
        assert!(message.body.contains(&format!("\nTotal: {}", Money::from_cents(500))));
        assert!(message.body.contains("1 Main St"));
    }

    #[tokio::test]
    async fn in_memory_notifier_records_and_fails() {
        let user = User::new("Ada", "ada@example.com");
        let notifier = InMemoryNotifier::new();
        let message = OrderConfirmation::for_order(&order_for(&user), &user);

        notifier.send(message.clone()).await.unwrap();
        assert_eq!(notifier.sent(), vec![message.clone()]);

        notifier.set_should_fail(true);
        assert!(notifier.send(message).await.is_err());
        assert_eq!(notifier.sent().len(), 1);
    }
}
