//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CartItemId, ProductId, UserId};
use domain::{CartItem, Variant};
use fulfillment::{AddItem, CartEntry};
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: Option<u32>,
    #[serde(default)]
    pub variant: Variant,
}

#[derive(Debug, Deserialize)]
pub struct ModifyQuantityRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemResponse {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub name: String,
    pub image: Option<String>,
    pub price_cents: i64,
    pub quantity: u32,
    pub variant: Variant,
    pub is_reserved: bool,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&CartItem> for CartItemResponse {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id.to_string(),
            user_id: item.user_id.to_string(),
            product_id: item.product_id.to_string(),
            name: item.snapshot.name.clone(),
            image: item.snapshot.image.clone(),
            price_cents: item.snapshot.price.cents(),
            quantity: item.quantity,
            variant: item.variant.clone(),
            is_reserved: item.is_reserved(),
            reservation_deadline: item.reservation_deadline,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartEntryResponse {
    #[serde(flatten)]
    pub item: CartItemResponse,
    pub product_exists: bool,
    pub product_out_of_stock: bool,
}

impl From<&CartEntry> for CartEntryResponse {
    fn from(entry: &CartEntry) -> Self {
        Self {
            item: CartItemResponse::from(&entry.item),
            product_exists: entry.product_exists,
            product_out_of_stock: entry.product_out_of_stock,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartCountResponse {
    pub count: usize,
}

// -- Handlers --

/// POST /users/:user_id/cart: add a product, holding stock for it.
#[tracing::instrument(skip(state, body))]
pub async fn add<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    body: Result<Json<AddItemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CartItemResponse>), ApiError> {
    let Json(req) = body?;
    let user_id: UserId = parse_id(&user_id, "user")?;
    let product_id: ProductId = parse_id(&req.product_id, "product")?;
    let request = AddItem::one(product_id)
        .with_quantity(req.quantity.unwrap_or(1))
        .with_variant(req.variant);

    let outcome = state
        .retry
        .run(|| state.cart.add_item(user_id, request.clone()))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CartItemResponse::from(&outcome.item)),
    ))
}

/// GET /users/:user_id/cart: the cart checked against the live catalog.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<CartEntryResponse>>, ApiError> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let entries = state.cart.get_cart(user_id).await?;
    Ok(Json(entries.iter().map(CartEntryResponse::from).collect()))
}

/// GET /users/:user_id/cart/count
#[tracing::instrument(skip(state))]
pub async fn count<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<CartCountResponse>, ApiError> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let count = state.cart.cart_count(user_id).await?;
    Ok(Json(CartCountResponse { count }))
}

/// GET /users/:user_id/cart/:cart_item_id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path((user_id, cart_item_id)): Path<(String, String)>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let cart_item_id: CartItemId = parse_id(&cart_item_id, "cart item")?;
    let item = state.cart.get_item(user_id, cart_item_id).await?;
    Ok(Json(CartItemResponse::from(&item)))
}

/// PUT /users/:user_id/cart/:cart_item_id: change the held quantity.
#[tracing::instrument(skip(state, body))]
pub async fn modify<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path((user_id, cart_item_id)): Path<(String, String)>,
    body: Result<Json<ModifyQuantityRequest>, JsonRejection>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let Json(req) = body?;
    let user_id: UserId = parse_id(&user_id, "user")?;
    let cart_item_id: CartItemId = parse_id(&cart_item_id, "cart item")?;

    let item = state
        .retry
        .run(|| state.cart.modify_quantity(user_id, cart_item_id, req.quantity))
        .await?;
    Ok(Json(CartItemResponse::from(&item)))
}

/// DELETE /users/:user_id/cart/:cart_item_id: remove and release.
#[tracing::instrument(skip(state))]
pub async fn remove<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path((user_id, cart_item_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let cart_item_id: CartItemId = parse_id(&cart_item_id, "cart item")?;

    state
        .retry
        .run(|| state.cart.remove_item(user_id, cart_item_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
