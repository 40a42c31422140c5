//! Database migrations for feed-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Canonical product state, one row per supplier SKU
CREATE TABLE IF NOT EXISTS products (
    sku TEXT PRIMARY KEY,
    secondary_sku TEXT,
    marketplace_id TEXT,
    source TEXT NOT NULL,
    supplier_price REAL NOT NULL DEFAULT 0,
    freight_cost REAL NOT NULL DEFAULT 0,
    lead_time TEXT,
    lead_time_days INTEGER NOT NULL DEFAULT 0,
    quantity INTEGER NOT NULL DEFAULT 0,
    tax_supplier REAL NOT NULL DEFAULT 0,
    availability TEXT NOT NULL DEFAULT 'outOfStock',
    customer_price_shipping REAL NOT NULL DEFAULT 0,
    supplier_price_shipping REAL NOT NULL DEFAULT 0,
    handling_time INTEGER NOT NULL DEFAULT 0,
    brand TEXT,
    updated_flag INTEGER NOT NULL DEFAULT 0,
    last_updated_at DATETIME
);

CREATE INDEX IF NOT EXISTS idx_products_source ON products(source);
CREATE INDEX IF NOT EXISTS idx_products_source_flag ON products(source, updated_flag);
CREATE INDEX IF NOT EXISTS idx_products_secondary_sku ON products(secondary_sku);

-- Marketplace feed submissions
CREATE TABLE IF NOT EXISTS feed_submissions (
    id TEXT PRIMARY KEY,
    store_id TEXT NOT NULL,
    feed_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'submitted',
    batch_index INTEGER NOT NULL,
    content_digest TEXT NOT NULL,
    created_at DATETIME NOT NULL,
    report_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_feed_submissions_store ON feed_submissions(store_id, created_at DESC);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
