//! Startup catalog seeding.
//!
//! The catalog and user accounts are owned elsewhere; a seed file stands in
//! for them in local runs.

use std::path::Path;

use domain::{Product, User};
use serde::Deserialize;
use store::{Store, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to store seed data: {0}")]
    Store(#[from] StoreError),
}

/// Contents of a seed file.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl Seed {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SeedError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Upserts every product and user.
    pub async fn apply<S: Store>(&self, store: &S) -> Result<(), SeedError> {
        for product in &self.products {
            store.upsert_product(product).await?;
        }
        for user in &self.users {
            store.upsert_user(user).await?;
        }
        tracing::info!(
            products = self.products.len(),
            users = self.users.len(),
            "seed data loaded"
        );
        Ok(())
    }
}

/// Reads a seed file and applies it to `store`.
pub async fn load<S: Store>(store: &S, path: &Path) -> Result<(), SeedError> {
    let bytes = tokio::fs::read(path).await?;
    Seed::from_json(&bytes)?.apply(store).await
}
