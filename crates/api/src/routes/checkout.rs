//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use common::{CartItemId, UserId};
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: String,
    pub cart_item_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub payment_session_url: String,
    pub amount_total_cents: i64,
}

/// POST /checkout: validate the selection and open a payment session.
#[tracing::instrument(skip(state, body))]
pub async fn begin<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let Json(req) = body?;
    let user_id: UserId = parse_id(&req.user_id, "user")?;
    let cart_item_ids = req
        .cart_item_ids
        .iter()
        .map(|id| parse_id::<CartItemId>(id, "cart item"))
        .collect::<Result<Vec<_>, _>>()?;

    let session = state
        .checkout
        .begin_checkout(user_id, &cart_item_ids)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: session.id,
            payment_session_url: session.url,
            amount_total_cents: session.amount_total.cents(),
        }),
    ))
}
