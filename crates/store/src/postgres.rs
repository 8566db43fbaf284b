use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartItemId, Money, OrderId, PaymentId, ProductId, UserId};
use domain::{CartItem, Order, Product, ProductSnapshot, User, Variant};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{Store, UnitOfWork},
};

const CART_ITEM_COLUMNS: &str = "id, user_id, product_id, quantity, size, color, \
     reservation_deadline, product_name, product_image, product_price_cents, created_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("migrations applied");
        Ok(())
    }
}

/// Maps lock and serialization failures to retryable conflicts.
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => {
                metrics::counter!("store_conflicts_total").increment(1);
                tracing::debug!(code = ?db_err.code(), "transaction conflict");
                return StoreError::ConcurrencyConflict(db_err.message().to_string());
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::CorruptRow(format!("negative {column}: {value}")))
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        available_stock: to_u32(row.try_get("available_stock")?, "available_stock")?,
    })
}

fn row_to_user(row: PgRow) -> Result<User> {
    let cart: Vec<Uuid> = row.try_get("cart")?;
    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        cart: cart.into_iter().map(CartItemId::from_uuid).collect(),
        payment_customer_id: row.try_get("payment_customer_id")?,
    })
}

fn row_to_cart_item(row: PgRow) -> Result<CartItem> {
    Ok(CartItem {
        id: CartItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        variant: Variant::new(row.try_get("size")?, row.try_get("color")?),
        snapshot: ProductSnapshot {
            name: row.try_get("product_name")?,
            image: row.try_get("product_image")?,
            price: Money::from_cents(row.try_get("product_price_cents")?),
        },
        reservation_deadline: row.try_get("reservation_deadline")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

fn quantity_param(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::CorruptRow(format!("quantity {quantity}")))
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx> {
        let tx = self.pool.begin().await.map_err(map_db_error)?;
        Ok(PostgresTx { tx })
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, image, price_cents, available_stock FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, cart, payment_customer_id FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_user).transpose()
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_cart_item).transpose()
    }

    async fn get_cart_items(&self, ids: &[CartItemId]) -> Result<Vec<CartItem>> {
        let uuids: Vec<Uuid> = ids.iter().map(CartItemId::as_uuid).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CART_ITEM_COLUMNS}
            FROM cart_items
            JOIN UNNEST($1::uuid[]) WITH ORDINALITY AS wanted(id, position) USING (id)
            ORDER BY wanted.position
            "#
        ))
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cart_item).collect()
    }

    async fn find_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CartItemId>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM cart_items
            WHERE is_reserved AND reservation_deadline <= $1
            ORDER BY reservation_deadline ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(CartItemId::from_uuid).collect())
    }

    async fn reserved_quantity(&self, product_id: ProductId) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM cart_items
            WHERE product_id = $1 AND is_reserved
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(total).map_err(|_| StoreError::CorruptRow(format!("reserved total {total}")))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn find_order_by_payment(&self, payment_id: &PaymentId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document FROM orders WHERE payment_id = $1")
            .bind(payment_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT document FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, image, price_cents, available_stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                image = EXCLUDED.image,
                price_cents = EXCLUDED.price_cents,
                available_stock = EXCLUDED.available_stock
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.image)
        .bind(product.price.cents())
        .bind(i64::from(product.available_stock))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let cart: Vec<Uuid> = user.cart.iter().map(CartItemId::as_uuid).collect();
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, cart, payment_customer_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                email = EXCLUDED.email,
                cart = EXCLUDED.cart,
                payment_customer_id = EXCLUDED.payment_customer_id
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&cart)
        .bind(&user.payment_customer_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }
}

/// A unit of work against [`PostgresStore`], backed by a database transaction.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresTx {
    async fn adjust_stock(&mut self, product_id: ProductId, delta: i64) -> Result<u32> {
        let updated: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET available_stock = available_stock + $2
            WHERE id = $1 AND available_stock + $2 >= 0
            RETURNING available_stock
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("22003") => {
                StoreError::StockOverflow(product_id)
            }
            other => map_db_error(other),
        })?;

        if let Some(stock) = updated {
            return to_u32(stock, "available_stock");
        }

        let available: Option<i32> =
            sqlx::query_scalar("SELECT available_stock FROM products WHERE id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_db_error)?;

        match available {
            Some(available) => Err(StoreError::InsufficientStock {
                product_id,
                available: to_u32(available, "available_stock")?,
                delta,
            }),
            None => Err(StoreError::ProductNotFound(product_id)),
        }
    }

    async fn lock_user(&mut self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, cart, payment_customer_id FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.map(row_to_user).transpose()
    }

    async fn lock_cart_item(&mut self, id: CartItemId) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.map(row_to_cart_item).transpose()
    }

    async fn lock_matching_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
        variant: &Variant,
    ) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {CART_ITEM_COLUMNS} FROM cart_items
            WHERE user_id = $1
              AND product_id = $2
              AND size IS NOT DISTINCT FROM $3
              AND color IS NOT DISTINCT FROM $4
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(&variant.size)
        .bind(&variant.color)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.map(row_to_cart_item).transpose()
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (
                id, user_id, product_id, quantity, size, color, is_reserved,
                reservation_deadline, product_name, product_image, product_price_cents, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                size = EXCLUDED.size,
                color = EXCLUDED.color,
                is_reserved = EXCLUDED.is_reserved,
                reservation_deadline = EXCLUDED.reservation_deadline,
                product_name = EXCLUDED.product_name,
                product_image = EXCLUDED.product_image,
                product_price_cents = EXCLUDED.product_price_cents
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.user_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(quantity_param(item.quantity)?)
        .bind(&item.variant.size)
        .bind(&item.variant.color)
        .bind(item.is_reserved())
        .bind(item.reservation_deadline)
        .bind(&item.snapshot.name)
        .bind(&item.snapshot.image)
        .bind(item.snapshot.price.cents())
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn push_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET cart = CASE WHEN $2 = ANY(cart) THEN cart ELSE array_append(cart, $2) END
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(item_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn pull_cart_entry(&mut self, user_id: UserId, item_id: CartItemId) -> Result<()> {
        let result = sqlx::query("UPDATE users SET cart = array_remove(cart, $2) WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(item_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn set_payment_customer(&mut self, user_id: UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET payment_customer_id = $2 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(customer_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn lock_payment(&mut self, payment_id: &PaymentId) -> Result<Option<Order>> {
        // The order row may not exist yet, so lock the key instead of a row.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(payment_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        let row = sqlx::query("SELECT document FROM orders WHERE payment_id = $1")
            .bind(payment_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        row.map(row_to_order).transpose()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let document = serde_json::to_value(order)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, payment_id, status, total_cents, created_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.payment_id().as_str())
        .bind(order.status().as_str())
        .bind(order.total_price().cents())
        .bind(order.created_at())
        .bind(document)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_payment")
            {
                return StoreError::DuplicatePayment(order.payment_id().clone());
            }
            map_db_error(e)
        })?;

        Ok(())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        row.map(row_to_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let document = serde_json::to_value(order)?;

        sqlx::query("UPDATE orders SET status = $2, document = $3 WHERE id = $1")
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(document)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}
