//! Inventory reservation and order fulfillment.
//!
//! This crate keeps stock, cart holds and orders consistent:
//! 1. The inventory ledger applies conditional stock adjustments
//! 2. The cart manager holds stock while items sit in a cart
//! 3. The sweeper releases holds whose deadline has passed
//! 4. Checkout validates a selection and opens a payment session
//! 5. Fulfillment turns a confirmed payment into exactly one order
//!
//! For every product, available stock plus the quantity held by reserved
//! cart items equals the physical inventory at every quiescent point.

pub mod cart;
pub mod checkout;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod sweeper;
pub mod webhook;

pub use cart::{AddItem, AddOutcome, CartEntry, CartManager, DEFAULT_HOLD_WINDOW_SECS};
pub use checkout::{CheckoutOrchestrator, CheckoutUrls};
pub use error::{FulfillmentError, Result};
pub use ledger::{InventoryLedger, StockLevel};
pub use notify::{InMemoryNotifier, LogNotifier, Notifier, OrderConfirmation};
pub use orders::{FulfillmentOutcome, OrderFulfillment};
pub use payment::{
    ConfirmedLine, InMemoryPaymentGateway, PaymentConfirmed, PaymentGateway, PaymentSession,
    SessionLine, SessionRequest,
};
pub use sweeper::{ReservationSweeper, SweepReport, SweeperConfig, SweeperHandle};
pub use webhook::{
    CHECKOUT_COMPLETED, SIGNATURE_HEADER, SignatureError, WebhookEvent, WebhookVerifier,
};
