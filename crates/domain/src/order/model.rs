//! The order entity.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use super::state::OrderStatus;
use super::value_objects::{OrderLine, ShippingDetails, StatusChange};
use crate::error::DomainError;

/// A placed order.
///
/// Lines are fixed at creation. Only the status moves afterwards, and
/// every move is appended to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    payment_id: PaymentId,
    items: Vec<OrderLine>,
    status: OrderStatus,
    status_history: Vec<StatusChange>,
    total_price: Money,
    shipping: ShippingDetails,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Records an order for a confirmed payment.
    ///
    /// The order starts `Processed` with a one-entry history.
    pub fn place(
        user_id: UserId,
        payment_id: PaymentId,
        items: Vec<OrderLine>,
        total_price: Money,
        shipping: ShippingDetails,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::NoItems);
        }
        if let Some(line) = items.iter().find(|line| line.quantity == 0) {
            return Err(DomainError::InvalidQuantity {
                quantity: line.quantity,
            });
        }
        if total_price.is_negative() {
            return Err(DomainError::InvalidAmount {
                cents: total_price.cents(),
            });
        }

        let mut order = Self {
            id: OrderId::new(),
            user_id,
            payment_id,
            items,
            status: OrderStatus::Pending,
            status_history: Vec::new(),
            total_price,
            shipping,
            created_at: at,
        };
        order.process(at)?;
        Ok(order)
    }

    /// Moves a pending order to processed.
    pub fn process(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_process() {
            return Err(DomainError::InvalidStatusTransition {
                current: self.status,
                action: "process",
            });
        }
        self.record(OrderStatus::Processed, at);
        Ok(())
    }

    /// Cancels the order. The caller is responsible for restocking.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_cancel() {
            return Err(DomainError::InvalidStatusTransition {
                current: self.status,
                action: "cancel",
            });
        }
        self.record(OrderStatus::Cancelled, at);
        Ok(())
    }

    fn record(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_history.push(StatusChange { status, at });
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn payment_id(&self) -> &PaymentId {
        &self.payment_id
    }

    pub fn items(&self) -> &[OrderLine] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn status_history(&self) -> &[StatusChange] {
        &self.status_history
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn shipping(&self) -> &ShippingDetails {
        &self.shipping
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sum of line totals at snapshot prices.
    pub fn items_subtotal(&self) -> Money {
        self.items.iter().map(OrderLine::total_price).sum()
    }

    /// Total units across all lines.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }
}
