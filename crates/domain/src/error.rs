//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised when an entity rejects a state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantities must be strictly positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Prices and totals cannot be negative.
    #[error("Invalid amount: {cents} cents (must not be negative)")]
    InvalidAmount { cents: i64 },

    /// An order needs at least one line.
    #[error("Order has no items")]
    NoItems,

    /// The order is not in a state that allows the requested transition.
    #[error("Invalid status transition: cannot {action} from {current} status")]
    InvalidStatusTransition {
        current: OrderStatus,
        action: &'static str,
    },
}
