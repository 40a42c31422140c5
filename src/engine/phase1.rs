//! Phase 1: refresh every SKU of a store from its supplier
//!
//! SKUs go through a [`TaskQueue`] paced by the store's rate limit. Results
//! are tallied in scheduling order, progress is published every
//! [`PROGRESS_EVERY`] processed SKUs and once at the end, and the failures are
//! flushed to a single snapshot when the phase finishes.
//!
//! SKUs that never started because the run was cancelled are left out of the
//! totals, so `success_count + fail_count == total_products` always holds.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{PhaseError, TaskError};
use crate::failure_log::FailureLog;
use crate::models::{FailureAccumulator, FailureRecord, PhaseOutcome, SyncPhase, SyncProgress};
use crate::sync::{RateLimiter, TaskQueue};

use super::refresh::{SkuRefresher, SkuResult};
use super::{RunContext, PROGRESS_EVERY};

/// Runs phase 1 for one store
pub struct Phase1Runner {
    ctx: RunContext,
    failure_log: FailureLog,
}

/// Running counters for one phase 1 invocation
#[derive(Debug, Default)]
struct Tally {
    success: usize,
    fail: usize,
    skipped: usize,
    persistence_streak: usize,
    wrote_once: bool,
}

impl Tally {
    fn processed(&self) -> usize {
        self.success + self.fail
    }
}

impl Phase1Runner {
    pub fn new(ctx: RunContext, failure_log: FailureLog) -> Self {
        Self { ctx, failure_log }
    }

    /// Refresh every SKU of the store
    pub async fn run(&self) -> Result<PhaseOutcome, PhaseError> {
        let ctx = &self.ctx;
        let skus = ctx.products.list_skus(&ctx.store_id).await?;
        let scheduled = skus.len();
        let abort_threshold = ctx.config.persistence_abort_threshold;

        info!(
            store = %ctx.store_id,
            provider = ctx.provider.display_name(),
            products = scheduled,
            requests_per_second = ctx.config.requests_per_second,
            "Phase 1 started"
        );
        ctx.publish(SyncProgress::starting(SyncPhase::Fetch, scheduled));

        let cancel = ctx.cancel.child_token();
        let limiter = Arc::new(RateLimiter::new(
            ctx.config.requests_per_second,
            ctx.config.max_concurrent,
        ));
        let queue = TaskQueue::new(limiter, cancel.clone());
        let refresher = Arc::new(SkuRefresher::new(
            ctx,
            ctx.skip_problematic(),
            Utc::now().date_naive(),
        ));

        let handles: Vec<_> = skus
            .into_iter()
            .map(|sku| {
                let refresher = Arc::clone(&refresher);
                let cancel = cancel.clone();
                let handle = queue.schedule({
                    let sku = sku.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return SkuResult::Skipped;
                        }
                        refresher.refresh(&sku).await
                    }
                });
                (sku, handle)
            })
            .collect();

        let mut tally = Tally::default();
        let mut failures = FailureAccumulator::new();
        let mut aborted = false;

        for (sku, handle) in handles {
            match handle.await {
                Ok(SkuResult::Refreshed { .. }) => {
                    tally.success += 1;
                    tally.wrote_once = true;
                }
                Ok(SkuResult::Failed {
                    record,
                    persistence,
                }) => {
                    tally.fail += 1;
                    failures.push(record);
                    if persistence && !tally.wrote_once {
                        tally.persistence_streak += 1;
                    }
                }
                Ok(SkuResult::Skipped) | Err(TaskError::Cancelled) => {
                    tally.skipped += 1;
                    continue;
                }
                Err(TaskError::Panicked(message)) => {
                    tally.fail += 1;
                    failures.push(
                        FailureRecord::new(sku, format!("task panicked: {}", message))
                            .with_extra("provider", ctx.provider.id())
                            .with_extra("error_kind", "panic"),
                    );
                }
            }

            if !aborted
                && abort_threshold > 0
                && !tally.wrote_once
                && tally.persistence_streak >= abort_threshold
            {
                error!(
                    store = %ctx.store_id,
                    failures = tally.persistence_streak,
                    "Every product write failed, aborting phase 1"
                );
                aborted = true;
                cancel.cancel();
            }

            if tally.processed() % PROGRESS_EVERY == 0 {
                self.publish_progress(scheduled, &tally);
            }
        }

        queue.on_idle().await;
        self.publish_progress(scheduled, &tally);

        let failures = failures.into_records();
        if let Err(e) = self
            .failure_log
            .write_snapshot(&ctx.store_id, &failures, Utc::now())
            .await
        {
            warn!(store = %ctx.store_id, error = %e, "Could not write failure snapshot");
        }

        if aborted {
            let err = PhaseError::PersistenceAborted {
                failures: tally.persistence_streak,
            };
            ctx.publish(SyncProgress {
                error: Some(err.to_string()),
                ..self.progress(scheduled, &tally)
            });
            return Err(err);
        }

        let outcome = PhaseOutcome {
            total_products: tally.processed(),
            success_count: tally.success,
            fail_count: tally.fail,
        };
        info!(
            store = %ctx.store_id,
            total = outcome.total_products,
            success = outcome.success_count,
            failed = outcome.fail_count,
            skipped = tally.skipped,
            "Phase 1 completed"
        );
        Ok(outcome)
    }

    fn progress(&self, scheduled: usize, tally: &Tally) -> SyncProgress {
        SyncProgress::starting(SyncPhase::Fetch, scheduled - tally.skipped).with_counts(
            tally.processed(),
            tally.success,
            tally.fail,
        )
    }

    fn publish_progress(&self, scheduled: usize, tally: &Tally) {
        self.ctx.publish(self.progress(scheduled, tally));
    }
}
