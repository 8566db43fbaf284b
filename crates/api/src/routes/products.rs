//! Stock audit endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use serde::Serialize;
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockResponse {
    pub product_id: String,
    pub available: u32,
    pub held: u64,
}

/// GET /products/:id/stock: available units and units held by carts.
#[tracing::instrument(skip(state))]
pub async fn stock<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id: ProductId = parse_id(&id, "product")?;
    let level = state.ledger.stock_level(product_id).await?;
    Ok(Json(StockResponse {
        product_id: level.product_id.to_string(),
        available: level.available,
        held: level.held,
    }))
}
