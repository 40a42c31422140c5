//! Database layer for feed-sync
//!
//! This module defines the product store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteProductStore;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{FeedSubmission, ProductDelta, ProductRecord};
use crate::providers::Phase2Queries;

/// Column list matching [`sqlite::product_from_row`]
///
/// Provider phase 2 statements select exactly these columns so their rows can
/// be decoded by the shared mapper.
pub const PRODUCT_COLUMNS: &str = "sku, secondary_sku, marketplace_id, source, supplier_price, \
     freight_cost, lead_time, lead_time_days, quantity, tax_supplier, availability, \
     customer_price_shipping, supplier_price_shipping, handling_time, brand, updated_flag, \
     last_updated_at";

/// Product store trait for data persistence
///
/// Every product mutation is a single-row write keyed by SKU. Phase 1 owns the
/// data fields; phase 2 only ever clears `updated_flag`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductStore: Send + Sync {
    // =========================================================================
    // Catalog operations
    // =========================================================================

    /// Insert or replace a product record
    async fn insert_product(&self, product: &ProductRecord) -> Result<(), DbError>;

    /// Insert or replace many product records in one transaction
    ///
    /// Returns the number of rows written
    async fn insert_products(&self, products: &[ProductRecord]) -> Result<usize, DbError>;

    /// Get a product by SKU
    async fn get_product(&self, sku: &str) -> Result<Option<ProductRecord>, DbError>;

    /// SKUs owned by a store, in SKU order
    async fn list_skus(&self, source: &str) -> Result<Vec<String>, DbError>;

    // =========================================================================
    // Phase 1 writes
    // =========================================================================

    /// Write a supplier delta and mark the row dirty with `flag`
    ///
    /// Fails with `DbError::NotFound` when the SKU does not exist.
    async fn apply_delta(&self, sku: &str, delta: &ProductDelta, flag: i64) -> Result<(), DbError>;

    /// Refresh `last_updated_at` without touching data or the flag
    async fn touch(&self, sku: &str) -> Result<(), DbError>;

    // =========================================================================
    // Phase 2 reads and flag resets
    // =========================================================================

    /// Dirty rows for a store, using the provider's select statement
    async fn select_updated(
        &self,
        queries: &Phase2Queries,
        source: &str,
        flag: i64,
        sku_pattern: Option<String>,
    ) -> Result<Vec<ProductRecord>, DbError>;

    /// Clear the flag for the given SKUs, using the provider's reset statement
    ///
    /// Returns the number of rows cleared
    async fn clear_updated(
        &self,
        queries: &Phase2Queries,
        source: &str,
        flag: i64,
        skus: &[String],
    ) -> Result<u64, DbError>;

    // =========================================================================
    // Feed submission operations
    // =========================================================================

    /// Record a freshly submitted feed
    async fn record_submission(&self, submission: &FeedSubmission) -> Result<(), DbError>;

    /// Persist a submission's status and report
    async fn update_submission(&self, submission: &FeedSubmission) -> Result<(), DbError>;

    /// Get a submission by remote feed id
    async fn get_submission(&self, id: &str) -> Result<Option<FeedSubmission>, DbError>;

    /// Submissions for a store, newest first
    async fn list_submissions(&self, store_id: &str) -> Result<Vec<FeedSubmission>, DbError>;
}
