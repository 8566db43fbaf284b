//! Shopper account as far as the cart is concerned.

use common::{CartItemId, UserId};
use serde::{Deserialize, Serialize};

/// A shopper.
///
/// `cart` is an ordered set of cart item ids. The user references cart
/// items but does not govern their existence; the cart manager does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub cart: Vec<CartItemId>,
    pub payment_customer_id: Option<String>,
}

impl User {
    /// Creates a user with an empty cart.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into(),
            cart: Vec::new(),
            payment_customer_id: None,
        }
    }

    /// Returns true if the cart references the item.
    pub fn owns(&self, item: CartItemId) -> bool {
        self.cart.contains(&item)
    }

    /// Appends an item to the cart, keeping entries unique.
    pub fn push_cart(&mut self, item: CartItemId) {
        if !self.owns(item) {
            self.cart.push(item);
        }
    }

    /// Removes an item from the cart. Returns false if it was not there.
    pub fn pull_cart(&mut self, item: CartItemId) -> bool {
        let before = self.cart.len();
        self.cart.retain(|id| *id != item);
        self.cart.len() != before
    }
}
