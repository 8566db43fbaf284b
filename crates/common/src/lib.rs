//! Shared building blocks for the order-fulfillment workspace.

pub mod clock;
pub mod money;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::Money;
pub use types::{CartItemId, OrderId, PaymentId, ProductId, UserId};
