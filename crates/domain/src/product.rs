//! Catalog product as seen by the fulfillment core.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A catalog product.
///
/// The catalog owns everything here except `available_stock`, which is
/// only ever changed through the inventory ledger's conditional adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub image: Option<String>,
    pub price: Money,
    pub available_stock: u32,
}

impl Product {
    /// Creates a product with the given stock.
    pub fn new(name: impl Into<String>, price: Money, available_stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            image: None,
            price,
            available_stock,
        }
    }

    /// Sets the display image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Copies the display fields that cart items and orders keep.
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            name: self.name.clone(),
            image: self.image.clone(),
            price: self.price,
        }
    }
}

/// Display fields copied from a product at a point in time.
///
/// Later catalog edits never reach back into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub image: Option<String>,
    pub price: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_detached_from_product() {
        let mut product = Product::new("Widget", Money::from_cents(1000), 5).with_image("w.png");
        let snapshot = product.snapshot();

        product.name = "Renamed".to_string();
        product.price = Money::from_cents(2000);

        assert_eq!(snapshot.name, "Widget");
        assert_eq!(snapshot.image.as_deref(), Some("w.png"));
        assert_eq!(snapshot.price, Money::from_cents(1000));
    }
}
