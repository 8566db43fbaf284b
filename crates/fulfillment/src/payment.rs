//! Payment provider boundary.
//!
//! The engine only needs two things from the provider: open a payment
//! session for a cart, and later receive a confirmation for it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CartItemId, Money, PaymentId, ProductId, UserId};
use domain::{CartItem, OrderLine, ShippingDetails, User, Variant};
use serde::{Deserialize, Serialize};

use crate::error::{FulfillmentError, Result};

/// One purchasable line in a payment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLine {
    pub product_id: ProductId,
    pub cart_item_id: CartItemId,
    pub name: String,
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub variant: Variant,
}

impl SessionLine {
    /// Builds a line from a cart item's snapshot.
    pub fn from_cart_item(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            cart_item_id: item.id,
            name: item.snapshot.name.clone(),
            image: item.snapshot.image.clone(),
            quantity: item.quantity,
            unit_price: item.snapshot.price,
            variant: item.variant.clone(),
        }
    }
}

/// Everything the provider needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub user_id: UserId,
    pub customer_id: String,
    pub lines: Vec<SessionLine>,
    pub success_url: String,
    pub cancel_url: String,
}

impl SessionRequest {
    pub fn total(&self) -> Money {
        self.lines
            .iter()
            .map(|line| line.unit_price.multiply(line.quantity))
            .sum()
    }
}

/// An open payment session the shopper is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSession {
    pub id: String,
    pub url: String,
    pub amount_total: Money,
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Registers the user with the provider and returns the customer id.
    async fn create_customer(&self, user: &User) -> Result<String>;

    /// Opens a payment session.
    async fn create_session(&self, request: SessionRequest) -> Result<PaymentSession>;
}

/// A paid line as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub cart_item_id: Option<CartItemId>,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub variant: Variant,
}

impl ConfirmedLine {
    /// Freezes the paid line into an order line.
    pub fn to_order_line(&self) -> OrderLine {
        OrderLine {
            product_id: self.product_id,
            cart_item_id: self.cart_item_id,
            product_name: self.name.clone(),
            product_image: self.image.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            variant: self.variant.clone(),
        }
    }
}

impl From<&SessionLine> for ConfirmedLine {
    fn from(line: &SessionLine) -> Self {
        Self {
            product_id: line.product_id,
            cart_item_id: Some(line.cart_item_id),
            name: line.name.clone(),
            image: line.image.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            variant: line.variant.clone(),
        }
    }
}

/// A payment-confirmed event.
///
/// `payment_id` is the idempotency key: the provider may deliver the same
/// confirmation more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    #[serde(default)]
    pub customer_id: Option<String>,
    pub lines: Vec<ConfirmedLine>,
    pub amount_total: Money,
    #[serde(default)]
    pub shipping: ShippingDetails,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    customers: HashMap<String, UserId>,
    sessions: HashMap<String, SessionRequest>,
    next_id: u32,
    fail_on_session: bool,
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
    base_url: String,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::with_base_url("https://pay.example.com/session")
    }

    /// Uses `base_url` as the prefix of returned session urls.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            state: Arc::default(),
            base_url: base_url.into(),
        }
    }

    /// Configures the gateway to refuse new sessions.
    pub fn set_fail_on_session(&self, fail: bool) {
        self.write().fail_on_session = fail;
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn customer_count(&self) -> usize {
        self.read().customers.len()
    }

    /// Returns the request a session was opened with.
    pub fn session(&self, session_id: &str) -> Option<SessionRequest> {
        self.read().sessions.get(session_id).cloned()
    }

    /// Simulates the shopper paying for a session.
    ///
    /// Returns the confirmation the provider would deliver, or `None` for
    /// an unknown session.
    pub fn complete_session(
        &self,
        session_id: &str,
        shipping: ShippingDetails,
    ) -> Option<PaymentConfirmed> {
        let state = self.read();
        let request = state.sessions.get(session_id)?;
        Some(PaymentConfirmed {
            payment_id: PaymentId::new(session_id),
            user_id: request.user_id,
            customer_id: Some(request.customer_id.clone()),
            lines: request.lines.iter().map(ConfirmedLine::from).collect(),
            amount_total: request.total(),
            shipping,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_customer(&self, user: &User) -> Result<String> {
        let mut state = self.write();
        state.next_id += 1;
        let customer_id = format!("cus_{:06}", state.next_id);
        state.customers.insert(customer_id.clone(), user.id);
        Ok(customer_id)
    }

    async fn create_session(&self, request: SessionRequest) -> Result<PaymentSession> {
        let mut state = self.write();
        if state.fail_on_session {
            return Err(FulfillmentError::PaymentGateway(
                "session creation declined".to_string(),
            ));
        }

        state.next_id += 1;
        let id = format!("cs_{:06}", state.next_id);
        let session = PaymentSession {
            url: format!("{}/{id}", self.base_url),
            amount_total: request.total(),
            id: id.clone(),
        };
        state.sessions.insert(id, request);
        Ok(session)
    }
}
