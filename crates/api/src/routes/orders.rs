//! Order query and administrative endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{Order, ShippingDetails, Variant};
use serde::Serialize;
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub payment_id: String,
    pub status: String,
    pub status_history: Vec<StatusChangeResponse>,
    pub items: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub shipping: ShippingDetails,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub variant: Variant,
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub status: String,
    pub at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            payment_id: order.payment_id().to_string(),
            status: order.status().to_string(),
            status_history: order
                .status_history()
                .iter()
                .map(|change| StatusChangeResponse {
                    status: change.status.to_string(),
                    at: change.at,
                })
                .collect(),
            items: order
                .items()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name.clone(),
                    product_image: line.product_image.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    variant: line.variant.clone(),
                })
                .collect(),
            total_cents: order.total_price().cents(),
            shipping: order.shipping().clone(),
            created_at: order.created_at(),
        }
    }
}

// -- Handlers --

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /users/:user_id/orders: newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let orders = state.orders.list_orders_for_user(user_id).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// POST /orders/:id/cancel: cancel and restock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state
        .retry
        .run(|| state.orders.cancel_order(order_id))
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}
