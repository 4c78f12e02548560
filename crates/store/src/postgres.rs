use async_trait::async_trait;
use chrono::Utc;
use common::{CouponId, ProductId, UserId, VariantId, Version};
use domain::{Cart, Coupon, Order, OrderNumber, OrderStatus, Product};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{CartStore, CatalogStore, CouponStore, OrderStore, StockDecrement, UsageIncrement},
};

const ORDER_NUMBER_CONSTRAINT: &str = "orders_order_number_key";
const REQUEST_TOKEN_CONSTRAINT: &str = "orders_request_token_key";

/// PostgreSQL-backed store.
///
/// Documents are kept as JSONB. The counters that concurrent orders race on
/// (stock, coupon usage, order version) live in plain columns and are only
/// changed by conditional `UPDATE ... WHERE` statements.
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
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let document: serde_json::Value = row.try_get("document")?;
        let mut order: Order = serde_json::from_value(document)?;
        order.set_version(Version::new(row.try_get("version")?));
        Ok(order)
    }

    fn map_insert_error(error: sqlx::Error, order: &Order) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = error {
            match db_err.constraint() {
                Some(ORDER_NUMBER_CONSTRAINT) => {
                    return StoreError::DuplicateOrderNumber(order.order_number().to_string());
                }
                Some(REQUEST_TOKEN_CONSTRAINT) => {
                    return StoreError::DuplicateRequestToken(
                        order.request_token().unwrap_or_default().to_string(),
                    );
                }
                _ => {}
            }
        }
        StoreError::Database(error)
    }
}

/// The nil uuid stands for the product-level stock row.
fn variant_key(variant_id: Option<VariantId>) -> Uuid {
    variant_id.map(|v| v.as_uuid()).unwrap_or(Uuid::nil())
}

fn stock_from_column(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn stock_not_found(product_id: ProductId, variant_id: Option<VariantId>) -> StoreError {
    match variant_id {
        Some(variant_id) => {
            StoreError::not_found("Stock record", format!("{product_id}/{variant_id}"))
        }
        None => StoreError::not_found("Stock record", product_id),
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM products WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        let Some(document) = document else {
            return Ok(None);
        };
        let mut product: Product = serde_json::from_value(document)?;

        let rows = sqlx::query(
            "SELECT variant_key, stock, track_inventory FROM stock_levels WHERE product_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let key: Uuid = row.try_get("variant_key")?;
            let variant_id = (!key.is_nil()).then(|| VariantId::from_uuid(key));
            if let Some(record) = product.stock_record_mut(variant_id) {
                record.stock = stock_from_column(row.try_get("stock")?);
                record.track_inventory = row.try_get("track_inventory")?;
            }
        }

        Ok(Some(product))
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let document = serde_json::to_value(product)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (id, document, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(document)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM stock_levels WHERE product_id = $1")
            .bind(product.id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let records = std::iter::once((None, product.inventory)).chain(
            product
                .variants
                .values()
                .map(|variant| (Some(variant.id), variant.inventory)),
        );
        for (variant_id, record) in records {
            sqlx::query(
                r#"
                INSERT INTO stock_levels (product_id, variant_key, stock, track_inventory)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(product.id.as_uuid())
            .bind(variant_key(variant_id))
            .bind(to_column(record.stock))
            .bind(record.track_inventory)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE stock_levels
            SET stock = CASE WHEN track_inventory THEN stock - $3 ELSE stock END
            WHERE product_id = $1
              AND variant_key = $2
              AND (NOT track_inventory OR stock >= $3)
            RETURNING stock
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(variant_key(variant_id))
        .bind(to_column(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(StockDecrement::Applied {
                remaining: stock_from_column(remaining),
            });
        }

        let available: Option<i32> = sqlx::query_scalar(
            "SELECT stock FROM stock_levels WHERE product_id = $1 AND variant_key = $2",
        )
        .bind(product_id.as_uuid())
        .bind(variant_key(variant_id))
        .fetch_optional(&self.pool)
        .await?;

        match available {
            Some(available) => {
                tracing::debug!(
                    %product_id,
                    quantity,
                    available,
                    "conditional stock decrement rejected"
                );
                Ok(StockDecrement::Insufficient {
                    available: stock_from_column(available),
                })
            }
            None => Err(stock_not_found(product_id, variant_id)),
        }
    }

    async fn restock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<u32> {
        let stock: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE stock_levels
            SET stock = CASE WHEN track_inventory THEN stock + $3 ELSE stock END
            WHERE product_id = $1 AND variant_key = $2
            RETURNING stock
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(variant_key(variant_id))
        .bind(to_column(quantity))
        .fetch_optional(&self.pool)
        .await?;

        stock
            .map(stock_from_column)
            .ok_or_else(|| stock_not_found(product_id, variant_id))
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(serde_json::from_value::<Cart>).transpose()?)
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, document, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.user_id.as_uuid())
        .bind(serde_json::to_value(cart)?)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn convert_cart(&self, user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM carts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(document) = document {
            let mut cart: Cart = serde_json::from_value(document)?;
            cart.convert();
            sqlx::query("UPDATE carts SET document = $2, updated_at = $3 WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .bind(serde_json::to_value(&cart)?)
                .bind(cart.updated_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for PostgresStore {
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        let row: Option<PgRow> =
            sqlx::query("SELECT document, usage_count FROM coupons WHERE code = $1")
                .bind(Coupon::normalize_code(code))
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let document: serde_json::Value = row.try_get("document")?;
                let mut coupon: Coupon = serde_json::from_value(document)?;
                coupon.usage_count = stock_from_column(row.try_get("usage_count")?);
                Ok(Some(coupon))
            }
            None => Ok(None),
        }
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, usage_count, usage_limit, document)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                usage_count = EXCLUDED.usage_count,
                usage_limit = EXCLUDED.usage_limit,
                document = EXCLUDED.document
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(&coupon.code)
        .bind(to_column(coupon.usage_count))
        .bind(coupon.usage_limit.map(to_column))
        .bind(serde_json::to_value(coupon)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_increment_usage(&self, id: CouponId) -> Result<UsageIncrement> {
        let usage: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE coupons
            SET usage_count = usage_count + 1
            WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)
            RETURNING usage_count
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(usage) = usage {
            return Ok(UsageIncrement::Applied {
                usage_count: stock_from_column(usage),
            });
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM coupons WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(UsageIncrement::LimitReached),
            None => Err(StoreError::not_found("Coupon", id)),
        }
    }

    async fn release_usage(&self, id: CouponId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE coupons SET usage_count = GREATEST(usage_count - 1, 0) WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Coupon", id));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let version = Version::first();
        let mut stored = order.clone();
        stored.set_version(version);

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, request_token, user_id, status, version, document, placed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number().as_str())
        .bind(order.request_token())
        .bind(order.customer().user_id().map(|u| u.as_uuid()))
        .bind(order.status().as_str())
        .bind(version.as_i64())
        .bind(serde_json::to_value(&stored)?)
        .bind(order.placed_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_insert_error(e, order))?;

        Ok(version)
    }

    async fn find_by_order_number(&self, order_number: &OrderNumber) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document, version FROM orders WHERE order_number = $1")
            .bind(order_number.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_request_token(&self, token: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document, version FROM orders WHERE request_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn save_order(&self, order: &Order) -> Result<Version> {
        let expected = order.version();
        let version = expected.next();
        let mut stored = order.clone();
        stored.set_version(version);

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET document = $3, status = $4, version = $5, updated_at = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(expected.as_i64())
        .bind(serde_json::to_value(&stored)?)
        .bind(order.status().as_str())
        .bind(version.as_i64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(version);
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order.id().as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        match actual {
            Some(actual) => Err(StoreError::Conflict {
                entity: format!("order {}", order.order_number()),
                expected,
                actual: Version::new(actual),
            }),
            None => Err(StoreError::not_found("Order", order.order_number())),
        }
    }

    async fn count_active_orders(&self, user_id: UserId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND status <> $2",
        )
        .bind(user_id.as_uuid())
        .bind(OrderStatus::Cancelled.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
