//! Integration tests for moving cart items into orders.

use chrono::{Duration, Utc};
use common::{Money, PaymentId, UserId};
use domain::{
    CartItem, DomainError, Order, OrderLine, OrderStatus, Product, ShippingDetails, User, Variant,
};

fn shipping() -> ShippingDetails {
    ShippingDetails {
        address: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        country: "US".to_string(),
        phone: Some("555-0100".to_string()),
    }
}

mod order_lifecycle {
    use super::*;

    #[test]
    fn cart_items_become_order_lines() {
        let now = Utc::now();
        let mut user = User::new("Ada", "ada@example.com");
        let shirt = Product::new("Shirt", Money::from_cents(2000), 10).with_image("shirt.png");
        let mug = Product::new("Mug", Money::from_cents(800), 10);

        let size_m = Variant::new(Some("M".into()), Some("blue".into()));
        let shirt_item = CartItem::reserved(
            user.id,
            &shirt,
            2,
            size_m.clone(),
            now + Duration::minutes(30),
            now,
        )
        .unwrap();
        let mut mug_item =
            CartItem::reserved(user.id, &mug, 1, Variant::default(), now, now).unwrap();
        mug_item.release();

        user.push_cart(shirt_item.id);
        user.push_cart(mug_item.id);

        let lines = vec![
            OrderLine::from_cart_item(&shirt_item, shirt_item.quantity).unwrap(),
            OrderLine::from_cart_item(&mug_item, 3).unwrap(),
        ];
        let total = lines.iter().map(OrderLine::total_price).sum();
        let order = Order::place(
            user.id,
            PaymentId::from("cs_test_1"),
            lines,
            total,
            shipping(),
            now,
        )
        .unwrap();

        assert_eq!(order.total_price(), Money::from_cents(2 * 2000 + 3 * 800));
        assert_eq!(order.items()[0].variant, size_m);
        assert_eq!(order.items()[0].product_image.as_deref(), Some("shirt.png"));
        assert_eq!(order.items()[1].quantity, 3);
        assert_eq!(order.items()[1].cart_item_id, Some(mug_item.id));
        assert_eq!(order.shipping().city, "Springfield");
        assert_eq!(order.payment_id().as_str(), "cs_test_1");
    }

    #[test]
    fn order_lines_ignore_later_catalog_changes() {
        let now = Utc::now();
        let mut product = Product::new("Lamp", Money::from_cents(4500), 3);
        let item =
            CartItem::reserved(UserId::new(), &product, 1, Variant::default(), now, now).unwrap();
        let line = OrderLine::from_cart_item(&item, 1).unwrap();

        product.price = Money::from_cents(9900);
        product.name = "Deluxe Lamp".to_string();

        assert_eq!(line.unit_price, Money::from_cents(4500));
        assert_eq!(line.product_name, "Lamp");
    }

    #[test]
    fn cancelled_order_cannot_be_reprocessed() {
        let now = Utc::now();
        let product = Product::new("Lamp", Money::from_cents(4500), 3);
        let item =
            CartItem::reserved(UserId::new(), &product, 1, Variant::default(), now, now).unwrap();
        let mut order = Order::place(
            item.user_id,
            PaymentId::from("cs_test_2"),
            vec![OrderLine::from_cart_item(&item, 1).unwrap()],
            Money::from_cents(4500),
            shipping(),
            now,
        )
        .unwrap();

        order.cancel(now + Duration::hours(1)).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);

        let history: Vec<_> = order.status_history().iter().map(|c| c.status).collect();
        assert_eq!(history, vec![OrderStatus::Processed, OrderStatus::Cancelled]);

        assert_eq!(
            order.process(now + Duration::hours(2)),
            Err(DomainError::InvalidStatusTransition {
                current: OrderStatus::Cancelled,
                action: "process",
            })
        );
    }
}
