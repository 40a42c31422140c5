//! Supplier provider trait definition
//!
//! Every supplier integration implements [`SupplierProvider`]. The runners
//! only ever talk to this trait; which implementation backs a store is
//! decided once, by the [`ProviderFactory`](super::ProviderFactory).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::SyncError;
use crate::models::ProductDelta;

use super::ProviderKind;

/// Supplier answer for one SKU before any store rules are applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSupplierData {
    /// Supplier says the item can be ordered
    pub available: bool,
    /// Units on hand, when the supplier reports a count
    pub stock: Option<i64>,
    /// Unit price
    pub price: Option<f64>,
    /// Freight charged per unit
    pub freight: Option<f64>,
    /// Brand name
    pub brand: Option<String>,
    /// Earliest promised delivery date
    pub min_delivery: Option<NaiveDate>,
    /// Latest promised delivery date
    pub max_delivery: Option<NaiveDate>,
    /// Supplier's own lead time wording
    pub lead_time_label: Option<String>,
}

/// Result of a supplier lookup
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Supplier knows the SKU
    Found(RawSupplierData),
    /// Supplier does not list the SKU
    NotFound,
}

/// Statements used by phase 2 for one provider's rows
///
/// `select_updated` binds `?1` source, `?2` flag value and `?3` an optional
/// SKU `LIKE` pattern, and must return the product columns in table order.
/// `reset_flag` binds `?1` source, `?2` flag value and `?3` the primary SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase2Queries {
    /// Select rows flagged as updated
    pub select_updated: String,
    /// Clear the flag on one row
    pub reset_flag: String,
}

/// Behavior a provider variant imposes regardless of store configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderDefaults {
    /// Failed SKUs are written out of stock instead of keeping stale data
    pub skip_problematic: bool,
}

/// Supplier integration used by the sync runners
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupplierProvider: Send + Sync {
    /// Registry id, e.g. `vitacost`
    fn id(&self) -> &str;

    /// Human-readable supplier name
    fn display_name(&self) -> &str;

    /// Which closed variant this is
    fn kind(&self) -> ProviderKind;

    /// Variant-level defaults
    fn defaults(&self) -> ProviderDefaults;

    /// Look up one SKU at the supplier
    ///
    /// Transport failures are returned as errors so the caller's retry
    /// policy can decide what to do with them.
    async fn fetch(&self, sku: &str) -> Result<FetchOutcome, SyncError>;

    /// Apply store rules to a raw supplier answer
    fn derive_canonical(
        &self,
        raw: &RawSupplierData,
        config: &StoreConfig,
        today: NaiveDate,
    ) -> ProductDelta;

    /// Phase 2 statements for this provider's rows
    fn phase2_queries(&self) -> Phase2Queries;

    /// Release per-run resources
    async fn close(&self);
}
