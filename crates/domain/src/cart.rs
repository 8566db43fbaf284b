//! Cart items and their reservation holds.

use chrono::{DateTime, Utc};
use common::{CartItemId, Money, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::product::{Product, ProductSnapshot};

/// Optional attributes that distinguish two lines of the same product.
///
/// Two cart items for one product merge only when their variants are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Variant {
    pub size: Option<String>,
    pub color: Option<String>,
}

impl Variant {
    /// Creates a variant from optional size and color.
    pub fn new(size: Option<String>, color: Option<String>) -> Self {
        Self { size, color }
    }
}

/// One line in a shopper's cart.
///
/// A reserved item has a deadline; an unreserved one has none. The hold
/// flag is derived from the deadline so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub variant: Variant,
    pub snapshot: ProductSnapshot,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    /// Creates a reserved cart item holding `quantity` units until `deadline`.
    pub fn reserved(
        user_id: UserId,
        product: &Product,
        quantity: u32,
        variant: Variant,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }

        Ok(Self {
            id: CartItemId::new(),
            user_id,
            product_id: product.id,
            quantity,
            variant,
            snapshot: product.snapshot(),
            reservation_deadline: Some(deadline),
            created_at: now,
        })
    }

    /// Returns true if this item currently holds stock.
    pub fn is_reserved(&self) -> bool {
        self.reservation_deadline.is_some()
    }

    /// Returns true if the item holds stock and its deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reservation_deadline
            .is_some_and(|deadline| deadline <= now)
    }

    /// Units currently deducted from available stock on this item's behalf.
    pub fn held_quantity(&self) -> u32 {
        if self.is_reserved() { self.quantity } else { 0 }
    }

    /// Marks the item as holding stock until `deadline`.
    pub fn hold_until(&mut self, deadline: DateTime<Utc>) {
        self.reservation_deadline = Some(deadline);
    }

    /// Drops the hold. Returns the number of units that must go back to stock.
    pub fn release(&mut self) -> u32 {
        let held = self.held_quantity();
        self.reservation_deadline = None;
        held
    }

    /// Changes the quantity.
    pub fn set_quantity(&mut self, quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        self.quantity = quantity;
        Ok(())
    }

    /// Refreshes the display snapshot from the current catalog entry.
    pub fn refresh_snapshot(&mut self, product: &Product) {
        self.snapshot = product.snapshot();
    }

    /// Snapshot price times quantity.
    pub fn line_total(&self) -> Money {
        self.snapshot.price.multiply(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn widget() -> Product {
        Product::new("Widget", Money::from_cents(250), 10)
    }

    #[test]
    fn reserved_item_has_deadline() {
        let now = Utc::now();
        let item = CartItem::reserved(
            UserId::new(),
            &widget(),
            2,
            Variant::default(),
            now + Duration::minutes(30),
            now,
        )
        .unwrap();

        assert!(item.is_reserved());
        assert_eq!(item.held_quantity(), 2);
        assert_eq!(item.line_total(), Money::from_cents(500));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let now = Utc::now();
        let result = CartItem::reserved(
            UserId::new(),
            &widget(),
            0,
            Variant::default(),
            now,
            now,
        );
        assert_eq!(result, Err(DomainError::InvalidQuantity { quantity: 0 }));
    }

    #[test]
    fn release_clears_deadline_and_returns_held_units() {
        let now = Utc::now();
        let mut item = CartItem::reserved(
            UserId::new(),
            &widget(),
            3,
            Variant::default(),
            now,
            now,
        )
        .unwrap();

        assert_eq!(item.release(), 3);
        assert!(!item.is_reserved());
        assert_eq!(item.reservation_deadline, None);
        assert_eq!(item.release(), 0);
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let now = Utc::now();
        let mut item = CartItem::reserved(
            UserId::new(),
            &widget(),
            1,
            Variant::default(),
            now,
            now,
        )
        .unwrap();

        assert!(item.is_expired(now));
        assert!(!item.is_expired(now - Duration::seconds(1)));

        item.release();
        assert!(!item.is_expired(now + Duration::days(1)));
    }

    #[test]
    fn variants_compare_by_value() {
        let a = Variant::new(Some("M".into()), Some("red".into()));
        let b = Variant::new(Some("M".into()), Some("red".into()));
        let c = Variant::new(Some("M".into()), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
