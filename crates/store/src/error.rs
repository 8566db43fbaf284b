use common::{PaymentId, ProductId, UserId};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// A stock adjustment would drive available stock below zero.
    #[error(
        "Insufficient stock for product {product_id}: available {available}, adjustment {delta}"
    )]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        delta: i64,
    },

    /// A stock adjustment would exceed the representable maximum.
    #[error("Stock overflow for product {0}")]
    StockOverflow(ProductId),

    /// An order already exists for this payment.
    #[error("Order already exists for payment {0}")]
    DuplicatePayment(PaymentId),

    /// The transaction lost a race and should be retried.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StoreError {
    /// Returns true if retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
