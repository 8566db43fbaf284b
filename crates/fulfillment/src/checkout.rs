//! Checkout orchestrator.
//!
//! Checkout is read-only with respect to stock: reserved items already hold
//! their units, unreserved items are checked against live stock but not held.

use std::collections::HashSet;

use common::{CartItemId, UserId};
use domain::{CartItem, Product};
use store::Store;

use crate::error::{FulfillmentError, Result};
use crate::payment::{PaymentGateway, PaymentSession, SessionLine, SessionRequest};

/// Where the provider sends the shopper after paying or abandoning.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self {
            success_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/cart".to_string(),
        }
    }
}

/// Validates a cart selection and opens a payment session for it.
pub struct CheckoutOrchestrator<S, P>
where
    S: Store,
    P: PaymentGateway,
{
    store: S,
    gateway: P,
    urls: CheckoutUrls,
}

impl<S, P> CheckoutOrchestrator<S, P>
where
    S: Store,
    P: PaymentGateway,
{
    pub fn new(store: S, gateway: P, urls: CheckoutUrls) -> Self {
        Self {
            store,
            gateway,
            urls,
        }
    }

    /// Opens a payment session for the given cart items.
    ///
    /// Fails with `OutOfStock` for the first unreserved item whose quantity
    /// exceeds live stock, and `ProductNotFound` if a product has been
    /// removed from the catalog.
    #[tracing::instrument(skip(self, cart_item_ids), fields(items = cart_item_ids.len()))]
    pub async fn begin_checkout(
        &self,
        user_id: UserId,
        cart_item_ids: &[CartItemId],
    ) -> Result<PaymentSession> {
        match self.open_session(user_id, cart_item_ids).await {
            Ok(session) => {
                metrics::counter!("checkout_sessions_total").increment(1);
                tracing::info!(session_id = %session.id, amount = %session.amount_total, "checkout session opened");
                Ok(session)
            }
            Err(err) => {
                metrics::counter!("checkout_rejections_total").increment(1);
                if err.is_stock_failure() {
                    tracing::warn!(error = %err, "checkout rejected");
                } else {
                    tracing::info!(error = %err, "checkout rejected");
                }
                Err(err)
            }
        }
    }

    async fn open_session(
        &self,
        user_id: UserId,
        cart_item_ids: &[CartItemId],
    ) -> Result<PaymentSession> {
        if cart_item_ids.is_empty() {
            return Err(FulfillmentError::Validation(
                "checkout requires at least one cart item".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(cart_item_ids.len());
        if let Some(dup) = cart_item_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(FulfillmentError::Validation(format!(
                "cart item {dup} listed more than once"
            )));
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(FulfillmentError::UserNotFound(user_id))?;

        let items = self.store.get_cart_items(cart_item_ids).await?;
        let mut lines = Vec::with_capacity(items.len());
        for id in cart_item_ids {
            let item = items
                .iter()
                .find(|item| item.id == *id && item.user_id == user_id)
                .ok_or(FulfillmentError::CartItemNotFound(*id))?;

            let product = self
                .store
                .get_product(item.product_id)
                .await?
                .ok_or(FulfillmentError::ProductNotFound(item.product_id))?;
            check_stock(item, &product)?;

            lines.push(SessionLine::from_cart_item(item));
        }

        let customer_id = match &user.payment_customer_id {
            Some(id) => id.clone(),
            None => self.gateway.create_customer(&user).await?,
        };

        self.gateway
            .create_session(SessionRequest {
                user_id,
                customer_id,
                lines,
                success_url: self.urls.success_url.clone(),
                cancel_url: self.urls.cancel_url.clone(),
            })
            .await
    }
}

/// Reserved items already hold their units; only unreserved ones are
/// checked against live stock.
fn check_stock(item: &CartItem, product: &Product) -> Result<()> {
    if item.is_reserved() || item.quantity <= product.available_stock {
        return Ok(());
    }
    Err(FulfillmentError::OutOfStock {
        product_id: product.id,
        requested: item.quantity,
        available: product.available_stock,
    })
}
