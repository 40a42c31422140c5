//! SQLite implementation of the ProductStore trait
//!
//! This module provides a SQLite-based implementation of the ProductStore
//! trait using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::{ProductStore, PRODUCT_COLUMNS};
use crate::error::DbError;
use crate::models::{FeedStatus, FeedSubmission, ProductDelta, ProductRecord};
use crate::providers::Phase2Queries;

/// SQLite product store
pub struct SqliteProductStore {
    conn: Connection,
}

impl SqliteProductStore {
    /// Open a SQLite database and apply the schema
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

const UPSERT_PRODUCT: &str = r#"
    INSERT OR REPLACE INTO products
    (sku, secondary_sku, marketplace_id, source, supplier_price, freight_cost, lead_time,
     lead_time_days, quantity, tax_supplier, availability, customer_price_shipping,
     supplier_price_shipping, handling_time, brand, updated_flag, last_updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
"#;

fn upsert_product(conn: &rusqlite::Connection, p: &ProductRecord) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_PRODUCT,
        rusqlite::params![
            p.sku,
            p.secondary_sku,
            p.marketplace_id,
            p.source,
            p.supplier_price,
            p.freight_cost,
            p.lead_time,
            p.lead_time_days,
            p.quantity,
            p.tax_supplier,
            p.availability.to_string(),
            p.customer_price_shipping,
            p.supplier_price_shipping,
            p.handling_time,
            p.brand,
            p.updated_flag,
            p.last_updated_at.map(|dt| dt.to_rfc3339()),
        ],
    )
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    // =========================================================================
    // Catalog operations
    // =========================================================================

    async fn insert_product(&self, product: &ProductRecord) -> Result<(), DbError> {
        let product = product.clone();

        self.conn
            .call(move |conn| {
                upsert_product(conn, &product)?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn insert_products(&self, products: &[ProductRecord]) -> Result<usize, DbError> {
        let products = products.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for product in &products {
                    upsert_product(&tx, product)?;
                }
                tx.commit()?;
                Ok(products.len())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_product(&self, sku: &str) -> Result<Option<ProductRecord>, DbError> {
        let sku = sku.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM products WHERE sku = ?1", PRODUCT_COLUMNS);
                let product = conn
                    .query_row(&sql, [&sku], product_from_row)
                    .optional()?;
                Ok(product)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_skus(&self, source: &str) -> Result<Vec<String>, DbError> {
        let source = source.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT sku FROM products WHERE source = ?1 ORDER BY sku")?;
                let skus = stmt
                    .query_map([&source], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(skus)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Phase 1 writes
    // =========================================================================

    async fn apply_delta(&self, sku: &str, delta: &ProductDelta, flag: i64) -> Result<(), DbError> {
        let sku = sku.to_string();
        let delta = delta.clone();
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE products SET
                        availability = ?2,
                        quantity = ?3,
                        supplier_price = COALESCE(?4, supplier_price),
                        freight_cost = COALESCE(?5, freight_cost),
                        brand = COALESCE(?6, brand),
                        lead_time = COALESCE(?7, lead_time),
                        lead_time_days = ?8,
                        handling_time = ?9,
                        updated_flag = ?10,
                        last_updated_at = ?11
                    WHERE sku = ?1
                    "#,
                    rusqlite::params![
                        sku,
                        delta.availability.to_string(),
                        delta.quantity,
                        delta.supplier_price,
                        delta.freight_cost,
                        delta.brand,
                        delta.lead_time,
                        delta.lead_time_days,
                        delta.handling_time,
                        flag,
                        now,
                    ],
                )?;
                Ok(count)
            })
            .await?;

        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn touch(&self, sku: &str) -> Result<(), DbError> {
        let sku = sku.to_string();
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE products SET last_updated_at = ?2 WHERE sku = ?1",
                    rusqlite::params![sku, now],
                )?;
                Ok(count)
            })
            .await?;

        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Phase 2 reads and flag resets
    // =========================================================================

    async fn select_updated(
        &self,
        queries: &Phase2Queries,
        source: &str,
        flag: i64,
        sku_pattern: Option<String>,
    ) -> Result<Vec<ProductRecord>, DbError> {
        let sql = queries.select_updated.clone();
        let source = source.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let products = stmt
                    .query_map(rusqlite::params![source, flag, sku_pattern], product_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(products)
            })
            .await
            .map_err(Into::into)
    }

    async fn clear_updated(
        &self,
        queries: &Phase2Queries,
        source: &str,
        flag: i64,
        skus: &[String],
    ) -> Result<u64, DbError> {
        let sql = queries.reset_flag.clone();
        let source = source.to_string();
        let skus = skus.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut cleared = 0u64;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for sku in &skus {
                        cleared += stmt.execute(rusqlite::params![source, flag, sku])? as u64;
                    }
                }
                tx.commit()?;
                Ok(cleared)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Feed submission operations
    // =========================================================================

    async fn record_submission(&self, submission: &FeedSubmission) -> Result<(), DbError> {
        let s = submission.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO feed_submissions
                    (id, store_id, feed_type, status, batch_index, content_digest, created_at, report_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        s.id,
                        s.store_id,
                        s.feed_type,
                        s.status.to_string(),
                        s.batch_index as i64,
                        s.content_digest,
                        s.created_at.to_rfc3339(),
                        s.report_json,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DbError::ConstraintViolation(format!(
                        "feed submission {} already recorded",
                        submission.id
                    ))
                }
                other => DbError::Sqlite(other),
            })
    }

    async fn update_submission(&self, submission: &FeedSubmission) -> Result<(), DbError> {
        let id = submission.id.clone();
        let status = submission.status.to_string();
        let report_json = submission.report_json.clone();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE feed_submissions SET status = ?2, report_json = ?3 WHERE id = ?1",
                    rusqlite::params![id, status, report_json],
                )?;
                Ok(count)
            })
            .await?;

        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> Result<Option<FeedSubmission>, DbError> {
        let id = id.to_string();

        self.conn
            .call(move |conn| {
                let submission = conn
                    .query_row(
                        r#"
                        SELECT id, store_id, feed_type, status, batch_index, content_digest,
                               created_at, report_json
                        FROM feed_submissions
                        WHERE id = ?1
                        "#,
                        [&id],
                        submission_from_row,
                    )
                    .optional()?;
                Ok(submission)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_submissions(&self, store_id: &str) -> Result<Vec<FeedSubmission>, DbError> {
        let store_id = store_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, store_id, feed_type, status, batch_index, content_digest,
                           created_at, report_json
                    FROM feed_submissions
                    WHERE store_id = ?1
                    ORDER BY created_at DESC, batch_index DESC
                    "#,
                )?;
                let submissions = stmt
                    .query_map([&store_id], submission_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(submissions)
            })
            .await
            .map_err(Into::into)
    }
}

/// Decode a row selected with [`PRODUCT_COLUMNS`]
pub fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        sku: row.get(0)?,
        secondary_sku: row.get(1)?,
        marketplace_id: row.get(2)?,
        source: row.get(3)?,
        supplier_price: row.get(4)?,
        freight_cost: row.get(5)?,
        lead_time: row.get(6)?,
        lead_time_days: row.get(7)?,
        quantity: row.get(8)?,
        tax_supplier: row.get(9)?,
        availability: row
            .get::<_, String>(10)?
            .parse()
            .unwrap_or_default(),
        customer_price_shipping: row.get(11)?,
        supplier_price_shipping: row.get(12)?,
        handling_time: row.get(13)?,
        brand: row.get(14)?,
        updated_flag: row.get(15)?,
        last_updated_at: parse_datetime(row.get::<_, Option<String>>(16)?),
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<FeedSubmission> {
    Ok(FeedSubmission {
        id: row.get(0)?,
        store_id: row.get(1)?,
        feed_type: row.get(2)?,
        status: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(FeedStatus::Fatal),
        batch_index: row.get::<_, i64>(4)? as usize,
        content_digest: row.get(5)?,
        created_at: parse_datetime(row.get::<_, Option<String>>(6)?).unwrap_or_else(Utc::now),
        report_json: row.get(7)?,
    })
}

/// Parse a datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
