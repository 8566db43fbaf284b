//! Domain layer for the order-fulfillment engine.
//!
//! This crate holds the entities the consistency engine mutates:
//! - `Product` (only its available-stock counter is ours to change)
//! - `User` and the ordered list of cart item ids it references
//! - `CartItem`, whose reservation deadline doubles as its hold flag
//! - `Order`, an immutable line snapshot with a status state machine

pub mod cart;
pub mod error;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{CartItem, Variant};
pub use error::DomainError;
pub use order::{Order, OrderLine, OrderStatus, ShippingDetails, StatusChange};
pub use product::{Product, ProductSnapshot};
pub use user::User;
