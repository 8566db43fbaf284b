//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::FulfillmentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Engine error.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                internal()
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    match &err {
        FulfillmentError::UserNotFound(_)
        | FulfillmentError::ProductNotFound(_)
        | FulfillmentError::CartItemNotFound(_)
        | FulfillmentError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        FulfillmentError::Validation(_)
        | FulfillmentError::OutOfStock { .. }
        | FulfillmentError::InsufficientStock { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        FulfillmentError::ConcurrencyConflict(_) => {
            tracing::warn!(error = %err, "conflict retries exhausted");
            (StatusCode::BAD_REQUEST, "Out of stock".to_string())
        }
        FulfillmentError::InvalidStatusTransition(_) => (StatusCode::CONFLICT, err.to_string()),
        FulfillmentError::PaymentGateway(_) => {
            tracing::error!(error = %err, "payment provider failure");
            (
                StatusCode::BAD_GATEWAY,
                "Payment provider unavailable".to_string(),
            )
        }
        FulfillmentError::Internal(_) => {
            tracing::error!(error = %err, "internal server error");
            internal()
        }
    }
}

/// The detail is logged, never returned.
fn internal() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Fulfillment(FulfillmentError::Validation(format!(
            "invalid request body: {}",
            rejection.body_text()
        )))
    }
}
