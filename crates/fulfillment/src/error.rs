//! Fulfillment error types.

use common::{CartItemId, OrderId, ProductId, UserId};
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the consistency engine.
///
/// Every operation is all-or-nothing: when one of these is returned the
/// enclosing unit of work has been rolled back.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Cart item not found: {0}")]
    CartItemNotFound(CartItemId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Malformed input such as a zero quantity.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A new hold or a purchase could not be covered by available stock.
    #[error("Out of stock: product {product_id} has {available} available, {requested} requested")]
    OutOfStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A quantity change exceeds what the item holds plus available stock.
    #[error(
        "Insufficient stock: product {product_id} can cover at most {available}, {requested} requested"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The unit of work lost a race; the caller may retry.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// The external payment provider rejected or failed a request.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FulfillmentError {
    /// Returns true if the failure is a contention outcome rather than a bug.
    pub fn is_stock_failure(&self) -> bool {
        matches!(
            self,
            FulfillmentError::OutOfStock { .. } | FulfillmentError::InsufficientStock { .. }
        )
    }

    /// Returns true if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::ConcurrencyConflict(_))
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => FulfillmentError::ProductNotFound(id),
            StoreError::UserNotFound(id) => FulfillmentError::UserNotFound(id),
            StoreError::InsufficientStock {
                product_id,
                available,
                delta,
            } => FulfillmentError::InsufficientStock {
                product_id,
                requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
                available,
            },
            StoreError::ConcurrencyConflict(msg) => FulfillmentError::ConcurrencyConflict(msg),
            other => FulfillmentError::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStatusTransition { .. } => {
                FulfillmentError::InvalidStatusTransition(err.to_string())
            }
            other => FulfillmentError::Validation(other.to_string()),
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use domain::OrderStatus;

    use super::*;

    #[test]
    fn store_stock_errors_keep_their_shape() {
        let product_id = ProductId::new();
        let err: FulfillmentError = StoreError::InsufficientStock {
            product_id,
            available: 1,
            delta: -3,
        }
        .into();

        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock { requested: 3, available: 1, .. }
        ));
        assert!(err.is_stock_failure());
    }

    #[test]
    fn store_conflicts_are_retryable() {
        let err: FulfillmentError = StoreError::ConcurrencyConflict("deadlock".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn duplicate_payment_is_internal_when_unhandled() {
        let err: FulfillmentError =
            StoreError::DuplicatePayment(common::PaymentId::from("pi_1")).into();
        assert!(matches!(err, FulfillmentError::Internal(_)));
    }

    #[test]
    fn domain_errors_map_to_taxonomy() {
        let err: FulfillmentError = DomainError::InvalidQuantity { quantity: 0 }.into();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let err: FulfillmentError = DomainError::InvalidStatusTransition {
            current: OrderStatus::Cancelled,
            action: "cancel",
        }
        .into();
        assert!(matches!(err, FulfillmentError::InvalidStatusTransition(_)));
    }
}
