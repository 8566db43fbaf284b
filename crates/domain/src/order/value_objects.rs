//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{CartItemId, Money, ProductId};
use serde::{Deserialize, Serialize};

use super::state::OrderStatus;
use crate::cart::{CartItem, Variant};
use crate::error::DomainError;

/// A line item in an order, frozen at purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    /// The cart item this line was bought from, if any.
    pub cart_item_id: Option<CartItemId>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub variant: Variant,
}

impl OrderLine {
    /// Builds a line from a cart item, taking the paid quantity.
    pub fn from_cart_item(item: &CartItem, quantity: u32) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }

        Ok(Self {
            product_id: item.product_id,
            cart_item_id: Some(item.id),
            product_name: item.snapshot.name.clone(),
            product_image: item.snapshot.image.clone(),
            quantity,
            unit_price: item.snapshot.price,
            variant: item.variant.clone(),
        })
    }

    /// Returns the total price for this line.
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Where an order ships to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

/// One entry in an order's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}
