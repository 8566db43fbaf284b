//! Payment provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use common::Clock;
use fulfillment::{FulfillmentError, SIGNATURE_HEADER, WebhookEvent};
use serde::Serialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
}

impl WebhookResponse {
    fn received() -> Self {
        Self {
            received: true,
            ..Self::default()
        }
    }
}

/// POST /webhooks/payment: receive a provider event.
///
/// Answers 200 once the event is handled, including redeliveries and
/// business failures that a retry could not fix. Only signature problems
/// (400) and internal failures (500) invite the provider to retry.
#[tracing::instrument(skip(state, headers, body))]
pub async fn receive<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(verifier) = &state.webhook {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("webhook without signature");
                ApiError::BadRequest("Missing webhook signature".to_string())
            })?;
        verifier
            .verify(&body, signature, state.clock.now())
            .map_err(|err| {
                tracing::warn!(error = %err, "webhook signature rejected");
                ApiError::BadRequest(format!("Webhook signature rejected: {err}"))
            })?;
    }

    let event = WebhookEvent::parse(&body)?;
    let Some(confirmed) = event.payment_confirmed()? else {
        tracing::debug!(event_id = %event.id, kind = %event.kind, "ignoring webhook event");
        return Ok(Json(WebhookResponse::received()));
    };

    match state
        .retry
        .run(|| state.orders.fulfill(confirmed.clone()))
        .await
    {
        Ok(outcome) => Ok(Json(WebhookResponse {
            received: true,
            order_id: Some(outcome.order.id().to_string()),
            created: Some(outcome.created),
        })),
        Err(err @ (FulfillmentError::Internal(_) | FulfillmentError::ConcurrencyConflict(_))) => {
            Err(ApiError::Internal(err.to_string()))
        }
        Err(err) => {
            tracing::warn!(event_id = %event.id, error = %err, "payment could not be fulfilled");
            Ok(Json(WebhookResponse::received()))
        }
    }
}
