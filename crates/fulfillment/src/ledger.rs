//! Inventory ledger: the only writer of available stock.

use common::ProductId;
use serde::Serialize;
use store::{Store, StoreError, UnitOfWork};

use crate::error::{FulfillmentError, Result};

/// Conditionally adjusts a product's available stock inside `tx`.
///
/// Positive `delta` releases units, negative `delta` holds them. The
/// adjustment is refused with `InsufficientStock` if it would drive stock
/// below zero; callers abort their unit of work rather than retry.
pub async fn try_adjust<T: UnitOfWork>(
    tx: &mut T,
    product_id: ProductId,
    delta: i64,
) -> Result<u32> {
    match tx.adjust_stock(product_id, delta).await {
        Ok(stock) => {
            metrics::counter!("ledger_adjustments_total", "outcome" => "applied").increment(1);
            tracing::debug!(%product_id, delta, stock, "stock adjusted");
            Ok(stock)
        }
        Err(err @ StoreError::InsufficientStock { .. }) => {
            metrics::counter!("ledger_adjustments_total", "outcome" => "insufficient")
                .increment(1);
            tracing::debug!(%product_id, delta, "stock adjustment refused");
            Err(err.into())
        }
        Err(err) => {
            metrics::counter!("ledger_adjustments_total", "outcome" => "error").increment(1);
            Err(err.into())
        }
    }
}

/// Available and held units for one product.
///
/// `available + held` is the baseline stock the ledger conserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub available: u32,
    pub held: u64,
}

impl StockLevel {
    /// Physical units accounted for by the ledger.
    pub fn baseline(&self) -> u64 {
        u64::from(self.available) + self.held
    }
}

/// Read side of the inventory ledger.
#[derive(Clone)]
pub struct InventoryLedger<S: Store> {
    store: S,
}

impl<S: Store> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the product's current available stock.
    pub async fn available(&self, product_id: ProductId) -> Result<u32> {
        self.store
            .get_product(product_id)
            .await?
            .map(|product| product.available_stock)
            .ok_or(FulfillmentError::ProductNotFound(product_id))
    }

    /// Returns available and held units for a product.
    #[tracing::instrument(skip(self))]
    pub async fn stock_level(&self, product_id: ProductId) -> Result<StockLevel> {
        let available = self.available(product_id).await?;
        let held = self.store.reserved_quantity(product_id).await?;
        Ok(StockLevel {
            product_id,
            available,
            held,
        })
    }
}
