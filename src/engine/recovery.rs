//! Recheck of the latest failure snapshot
//!
//! Runs between phase 1 and phase 2. Every SKU the newest snapshot lists is
//! fetched again at a reduced rate; successes are written exactly like phase
//! 1 writes them and SKUs that still fail are left untouched. Running it twice
//! over the same snapshot gives the same end state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{PhaseError, TaskError};
use crate::failure_log::FailureLog;
use crate::models::{RecheckOutcome, SyncPhase, SyncProgress};
use crate::sync::{RateLimiter, TaskQueue};

use super::refresh::{SkuRefresher, SkuResult};
use super::{RunContext, PROGRESS_EVERY};

/// Concurrency ceiling for the recheck pass
pub const RECHECK_MAX_CONCURRENT: usize = 3;

/// Rechecks a store's most recent failures
pub struct FailureRecoveryService {
    ctx: RunContext,
    failure_log: FailureLog,
}

impl FailureRecoveryService {
    pub fn new(ctx: RunContext, failure_log: FailureLog) -> Self {
        Self { ctx, failure_log }
    }

    /// Recheck the newest snapshot; `None` when the store has none
    pub async fn run(&self) -> Result<Option<RecheckOutcome>, PhaseError> {
        let ctx = &self.ctx;

        let Some(path) = self.failure_log.latest_snapshot(&ctx.store_id).await? else {
            info!(store = %ctx.store_id, "No failure snapshot, skipping recheck");
            return Ok(None);
        };

        let records = self.failure_log.read_snapshot(&path).await?;
        let mut seen = HashSet::new();
        let skus: Vec<String> = records
            .into_iter()
            .map(|r| r.sku)
            .filter(|sku| seen.insert(sku.clone()))
            .collect();

        info!(
            store = %ctx.store_id,
            snapshot = %path.display(),
            products = skus.len(),
            "Recheck started"
        );
        ctx.publish(SyncProgress::starting(SyncPhase::Recheck, skus.len()));

        let mut outcome = RecheckOutcome::default();
        if skus.is_empty() {
            return Ok(Some(outcome));
        }

        let cancel = ctx.cancel.child_token();
        let limiter = Arc::new(RateLimiter::new(
            ctx.config.recheck_requests_per_second(),
            ctx.config.max_concurrent.min(RECHECK_MAX_CONCURRENT),
        ));
        let queue = TaskQueue::new(limiter, cancel.clone());
        // Still-failing SKUs keep whatever phase 1 left in place.
        let refresher = Arc::new(SkuRefresher::new(ctx, false, Utc::now().date_naive()));

        let handles: Vec<_> = skus
            .iter()
            .map(|sku| {
                let refresher = Arc::clone(&refresher);
                let cancel = cancel.clone();
                let sku = sku.clone();
                queue.schedule(async move {
                    if cancel.is_cancelled() {
                        return SkuResult::Skipped;
                    }
                    refresher.refresh(&sku).await
                })
            })
            .collect();

        let total = skus.len();
        let mut skipped = 0;
        for handle in handles {
            match handle.await {
                Ok(SkuResult::Refreshed { availability, .. }) => {
                    outcome.success_count += 1;
                    if availability.is_in_stock() {
                        outcome.in_stock_count += 1;
                    } else {
                        outcome.out_of_stock_count += 1;
                    }
                }
                Ok(SkuResult::Failed { record, .. }) => {
                    debug!(store = %ctx.store_id, sku = %record.sku, "Still failing");
                    outcome.fail_count += 1;
                }
                Err(TaskError::Panicked(_)) => outcome.fail_count += 1,
                Ok(SkuResult::Skipped) | Err(TaskError::Cancelled) => {
                    skipped += 1;
                    continue;
                }
            }

            outcome.total_checked = outcome.success_count + outcome.fail_count;
            if outcome.total_checked % PROGRESS_EVERY == 0 {
                self.publish(total - skipped, &outcome);
            }
        }

        queue.on_idle().await;
        outcome.total_checked = outcome.success_count + outcome.fail_count;
        self.publish(total - skipped, &outcome);

        info!(
            store = %ctx.store_id,
            checked = outcome.total_checked,
            recovered = outcome.success_count,
            still_failing = outcome.fail_count,
            in_stock = outcome.in_stock_count,
            out_of_stock = outcome.out_of_stock_count,
            "Recheck completed"
        );
        Ok(Some(outcome))
    }

    fn publish(&self, total: usize, outcome: &RecheckOutcome) {
        self.ctx.publish(
            SyncProgress::starting(SyncPhase::Recheck, total).with_counts(
                outcome.total_checked,
                outcome.success_count,
                outcome.fail_count,
            ),
        );
    }
}
