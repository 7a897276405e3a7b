//! PostgreSQL Order Store
//!
//! Connection pooling through deadpool-postgres and the [`OrderStore`]
//! implementation that persists the order aggregate across four tables.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use orderline_core::{Delivery, Item, Order, Payment, StorageError, StorageResult};
use orderline_storage::OrderStore;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a caller waits for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orderline".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 25,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size.max(1));
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_uid          TEXT PRIMARY KEY,
    track_number       TEXT NOT NULL,
    entry              TEXT NOT NULL,
    locale             TEXT NOT NULL,
    internal_signature TEXT NOT NULL DEFAULT '',
    customer_id        TEXT NOT NULL,
    delivery_service   TEXT NOT NULL,
    shardkey           TEXT NOT NULL,
    sm_id              BIGINT NOT NULL,
    date_created       TIMESTAMPTZ NOT NULL,
    oof_shard          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deliveries (
    order_uid TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    phone     TEXT NOT NULL,
    zip       TEXT NOT NULL,
    city      TEXT NOT NULL,
    address   TEXT NOT NULL,
    region    TEXT NOT NULL,
    email     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    order_uid     TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    transaction   TEXT NOT NULL,
    request_id    TEXT NOT NULL DEFAULT '',
    currency      TEXT NOT NULL,
    provider      TEXT NOT NULL,
    amount        BIGINT NOT NULL,
    payment_dt    BIGINT NOT NULL,
    bank          TEXT NOT NULL,
    delivery_cost BIGINT NOT NULL,
    goods_total   BIGINT NOT NULL,
    custom_fee    BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS items (
    id           BIGSERIAL PRIMARY KEY,
    order_uid    TEXT NOT NULL REFERENCES orders (order_uid) ON DELETE CASCADE,
    chrt_id      BIGINT NOT NULL,
    track_number TEXT NOT NULL,
    price        BIGINT NOT NULL,
    rid          TEXT NOT NULL,
    name         TEXT NOT NULL,
    sale         BIGINT NOT NULL,
    size         TEXT NOT NULL,
    total_price  BIGINT NOT NULL,
    nm_id        BIGINT NOT NULL,
    brand        TEXT NOT NULL,
    status       BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS items_order_uid_idx ON items (order_uid);
"#;

const INSERT_ORDER: &str = "INSERT INTO orders (order_uid, track_number, entry, locale, \
     internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_DELIVERY: &str = "INSERT INTO deliveries (order_uid, name, phone, zip, city, \
     address, region, email) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const INSERT_PAYMENT: &str = "INSERT INTO payments (order_uid, transaction, request_id, \
     currency, provider, amount, payment_dt, bank, delivery_cost, goods_total, custom_fee) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_ITEM: &str = "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, \
     name, sale, size, total_price, nm_id, brand, status) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

const SELECT_ORDERS: &str = "SELECT o.order_uid, o.track_number, o.entry, o.locale, \
     o.internal_signature, o.customer_id, o.delivery_service, o.shardkey, o.sm_id, \
     o.date_created, o.oof_shard, \
     d.name AS d_name, d.phone AS d_phone, d.zip AS d_zip, d.city AS d_city, \
     d.address AS d_address, d.region AS d_region, d.email AS d_email, \
     p.transaction AS p_transaction, p.request_id AS p_request_id, p.currency AS p_currency, \
     p.provider AS p_provider, p.amount AS p_amount, p.payment_dt AS p_payment_dt, \
     p.bank AS p_bank, p.delivery_cost AS p_delivery_cost, p.goods_total AS p_goods_total, \
     p.custom_fee AS p_custom_fee \
     FROM orders o \
     JOIN deliveries d ON d.order_uid = o.order_uid \
     JOIN payments p ON p.order_uid = o.order_uid";

const SELECT_ITEMS: &str = "SELECT order_uid, chrt_id, track_number, price, rid, name, sale, \
     size, total_price, nm_id, brand, status FROM items";

// ============================================================================
// ORDER STORE
// ============================================================================

/// [`OrderStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: Pool,
}

impl PgOrderStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the order tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        tracing::debug!("Order schema ensured");
        Ok(())
    }

    async fn client(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn insert(&self, order: &Order) -> StorageResult<()> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| query_error(e, &order.order_uid))?;
        let uid = &order.order_uid;

        tx.execute(
            INSERT_ORDER,
            &[
                uid,
                &order.track_number,
                &order.entry,
                &order.locale,
                &order.internal_signature,
                &order.customer_id,
                &order.delivery_service,
                &order.shardkey,
                &order.sm_id,
                &order.date_created,
                &order.oof_shard,
            ],
        )
        .await
        .map_err(|e| query_error(e, uid))?;

        let d = &order.delivery;
        tx.execute(
            INSERT_DELIVERY,
            &[uid, &d.name, &d.phone, &d.zip, &d.city, &d.address, &d.region, &d.email],
        )
        .await
        .map_err(|e| query_error(e, uid))?;

        let p = &order.payment;
        tx.execute(
            INSERT_PAYMENT,
            &[
                uid,
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await
        .map_err(|e| query_error(e, uid))?;

        for item in &order.items {
            tx.execute(
                INSERT_ITEM,
                &[
                    uid,
                    &item.chrt_id,
                    &item.track_number,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await
            .map_err(|e| query_error(e, uid))?;
        }

        tx.commit().await.map_err(|e| query_error(e, uid))
    }

    async fn select_one(&self, order_uid: &str) -> StorageResult<Order> {
        let client = self.client().await?;

        let sql = format!("{} WHERE o.order_uid = $1", SELECT_ORDERS);
        let row = client
            .query_opt(sql.as_str(), &[&order_uid])
            .await
            .map_err(|e| query_error(e, order_uid))?
            .ok_or_else(|| StorageError::NotFound {
                order_uid: order_uid.to_string(),
            })?;
        let mut order = order_from_row(&row).map_err(|e| query_error(e, order_uid))?;

        let sql = format!("{} WHERE order_uid = $1 ORDER BY id", SELECT_ITEMS);
        let rows = client
            .query(sql.as_str(), &[&order_uid])
            .await
            .map_err(|e| query_error(e, order_uid))?;
        order.items = rows
            .iter()
            .map(item_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| query_error(e, order_uid))?;

        Ok(order)
    }

    async fn select_all(&self) -> StorageResult<Vec<Order>> {
        let client = self.client().await?;

        let sql = format!("{} ORDER BY o.date_created", SELECT_ORDERS);
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| query_error(e, ""))?;

        let sql = format!("{} ORDER BY order_uid, id", SELECT_ITEMS);
        let item_rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| query_error(e, ""))?;

        let mut items: HashMap<String, Vec<Item>> = HashMap::new();
        for row in &item_rows {
            let order_uid: String = row.try_get("order_uid").map_err(|e| query_error(e, ""))?;
            let item = item_from_row(row).map_err(|e| query_error(e, &order_uid))?;
            items.entry(order_uid).or_default().push(item);
        }

        rows.iter()
            .map(|row| {
                let mut order = order_from_row(row).map_err(|e| query_error(e, ""))?;
                order.items = items.remove(&order.order_uid).unwrap_or_default();
                Ok(order)
            })
            .collect()
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.insert(order).await;
        record("create", &result, start);
        result
    }

    async fn get(&self, order_uid: &str) -> StorageResult<Order> {
        let start = Instant::now();
        let result = self.select_one(order_uid).await;
        // absence is a normal answer, not a store failure
        let ok = result.is_ok() || matches!(result, Err(StorageError::NotFound { .. }));
        with_metrics(|m| m.record_store_operation("get", ok, start.elapsed().as_secs_f64()));
        result
    }

    async fn get_all(&self) -> StorageResult<Vec<Order>> {
        let start = Instant::now();
        let result = self.select_all().await;
        record("get_all", &result, start);
        result
    }

    async fn health_check(&self) -> StorageResult<()> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| query_error(e, ""))?;
        Ok(())
    }
}

fn record<T>(operation: &str, result: &StorageResult<T>, start: Instant) {
    with_metrics(|m| {
        m.record_store_operation(operation, result.is_ok(), start.elapsed().as_secs_f64())
    });
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn order_from_row(row: &Row) -> Result<Order, tokio_postgres::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery: Delivery {
            name: row.try_get("d_name")?,
            phone: row.try_get("d_phone")?,
            zip: row.try_get("d_zip")?,
            city: row.try_get("d_city")?,
            address: row.try_get("d_address")?,
            region: row.try_get("d_region")?,
            email: row.try_get("d_email")?,
        },
        payment: Payment {
            transaction: row.try_get("p_transaction")?,
            request_id: row.try_get("p_request_id")?,
            currency: row.try_get("p_currency")?,
            provider: row.try_get("p_provider")?,
            amount: row.try_get("p_amount")?,
            payment_dt: row.try_get("p_payment_dt")?,
            bank: row.try_get("p_bank")?,
            delivery_cost: row.try_get("p_delivery_cost")?,
            goods_total: row.try_get("p_goods_total")?,
            custom_fee: row.try_get("p_custom_fee")?,
        },
        items: Vec::new(),
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn item_from_row(row: &Row) -> Result<Item, tokio_postgres::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(err: deadpool_postgres::PoolError) -> StorageError {
    StorageError::Unavailable {
        reason: err.to_string(),
    }
}

/// A duplicate primary key is a conflict; a dropped connection means the
/// store is unavailable; anything else failed the transaction.
fn query_error(err: tokio_postgres::Error, order_uid: &str) -> StorageError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return StorageError::Conflict {
            order_uid: order_uid.to_string(),
        };
    }
    if err.is_closed() {
        return StorageError::Unavailable {
            reason: err.to_string(),
        };
    }
    StorageError::TransactionFailed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_size() {
        let config = DbConfig::default();
        assert_eq!(config.max_size, 25);
        assert_eq!(config.port, 5432);
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // deadpool connects on first use, so building the pool needs no server
        let pool = DbConfig::default().create_pool();
        assert!(pool.is_ok());
    }

    #[test]
    fn test_schema_declares_every_table() {
        for table in ["orders", "deliveries", "payments", "items"] {
            assert!(SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table)));
        }
    }
}
