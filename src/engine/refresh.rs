//! Refresh of a single SKU
//!
//! Shared by phase 1 and the recheck pass: fetch under the store's retry
//! policy, derive the canonical fields, then write them. A delta identical to
//! the stored row only refreshes `last_updated_at` and leaves the row clean.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::database::ProductStore;
use crate::error::{DbError, SyncError};
use crate::models::{Availability, FailureRecord, ProductDelta};
use crate::providers::{FetchOutcome, SupplierProvider};
use crate::sync::RetryPolicy;

use super::RunContext;

/// Result of one SKU refresh
#[derive(Debug, Clone, PartialEq)]
pub enum SkuResult {
    /// Supplier answered and the row holds its data
    Refreshed {
        /// Availability now stored
        availability: Availability,
        /// Whether the row was rewritten and flagged
        changed: bool,
    },
    /// Fetch or write failed
    Failed {
        /// Entry for the failure snapshot
        record: FailureRecord,
        /// Whether the failure came from the product store
        persistence: bool,
    },
    /// Run was cancelled before the SKU was attempted
    Skipped,
}

/// Fetch, derive and persist one SKU at a time
pub struct SkuRefresher {
    store_id: String,
    config: Arc<StoreConfig>,
    provider: Arc<dyn SupplierProvider>,
    products: Arc<dyn ProductStore>,
    retry: RetryPolicy,
    skip_problematic: bool,
    today: NaiveDate,
}

impl SkuRefresher {
    /// Refresher for a run; `today` anchors delivery-window arithmetic
    pub fn new(ctx: &RunContext, skip_problematic: bool, today: NaiveDate) -> Self {
        Self {
            store_id: ctx.store_id.clone(),
            config: Arc::clone(&ctx.config),
            provider: Arc::clone(&ctx.provider),
            products: Arc::clone(&ctx.products),
            retry: RetryPolicy::new(ctx.config.retry.clone()),
            skip_problematic,
            today,
        }
    }

    /// Refresh one SKU
    pub async fn refresh(&self, sku: &str) -> SkuResult {
        let fetched = self.retry.execute(|| self.provider.fetch(sku)).await;

        let (reason, kind) = match fetched {
            Ok(FetchOutcome::Found(raw)) => {
                let delta = self
                    .provider
                    .derive_canonical(&raw, &self.config, self.today);
                return match self.persist(sku, &delta).await {
                    Ok(changed) => SkuResult::Refreshed {
                        availability: delta.availability,
                        changed,
                    },
                    Err(e) => self.persistence_failure(sku, &e),
                };
            }
            Ok(FetchOutcome::NotFound) => ("not found".to_string(), "not_found"),
            Err(e) => (e.to_string(), error_kind(&e)),
        };

        warn!(store = %self.store_id, sku = sku, reason = %reason, "SKU refresh failed");

        if self.skip_problematic {
            let delta = ProductDelta::unavailable(
                self.config.provider_handling_days,
                self.config.omd_handling_days + self.config.provider_handling_days,
            );
            if let Err(e) = self.persist(sku, &delta).await {
                return self.persistence_failure(sku, &e);
            }
            debug!(store = %self.store_id, sku = sku, "Failed SKU marked out of stock");
        }

        SkuResult::Failed {
            record: self.failure(sku, reason, kind),
            persistence: false,
        }
    }

    /// Write a delta; returns whether the row changed
    async fn persist(&self, sku: &str, delta: &ProductDelta) -> Result<bool, DbError> {
        let existing = self
            .products
            .get_product(sku)
            .await?
            .ok_or(DbError::NotFound)?;

        if !delta.differs_from(&existing) {
            self.products.touch(sku).await?;
            debug!(store = %self.store_id, sku = sku, "No change");
            return Ok(false);
        }

        self.products
            .apply_delta(sku, delta, self.config.update_flag_value)
            .await?;
        debug!(
            store = %self.store_id,
            sku = sku,
            availability = %delta.availability,
            quantity = delta.quantity,
            "Product updated"
        );
        Ok(true)
    }

    fn persistence_failure(&self, sku: &str, err: &DbError) -> SkuResult {
        warn!(store = %self.store_id, sku = sku, error = %err, "Product write failed");
        SkuResult::Failed {
            record: self.failure(sku, err.to_string(), "persistence"),
            persistence: true,
        }
    }

    fn failure(&self, sku: &str, reason: String, kind: &str) -> FailureRecord {
        FailureRecord::new(sku, reason)
            .with_extra("provider", self.provider.id())
            .with_extra("error_kind", kind)
    }
}

/// Short classification written to the failure snapshot
pub fn error_kind(err: &SyncError) -> &'static str {
    match err {
        SyncError::NetworkTimeout => "timeout",
        SyncError::ConnectionRefused | SyncError::Network(_) => "network",
        SyncError::RateLimited(_) => "rate_limited",
        SyncError::ServerError(_) => "server_error",
        SyncError::ClientError(_) | SyncError::Unauthorized => "client_error",
        SyncError::InvalidData(_) => "invalid_data",
        SyncError::NotFound => "not_found",
    }
}
