//! Run progress and phase results

use serde::{Deserialize, Serialize};

/// Which step of a run is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// No run active
    #[default]
    Idle,
    /// Phase 1: refresh from supplier
    Fetch,
    /// Recheck of the previous failure snapshot
    Recheck,
    /// Phase 2: publish to marketplace
    Publish,
    /// Run finished
    Completed,
}

/// Live progress snapshot for one store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// Active step
    pub phase: SyncPhase,
    /// Items the active step will process
    pub total_products: usize,
    /// Items finished so far
    pub processed_products: usize,
    /// Successful items
    pub success_count: usize,
    /// Failed items
    pub fail_count: usize,
    /// Completion percentage of the active step
    pub percentage: f64,
    /// One-based batch being published
    pub current_batch: Option<usize>,
    /// Batches in this publish
    pub total_batches: Option<usize>,
    /// Phase-level failure message
    pub error: Option<String>,
    /// Last parsed marketplace report
    pub report_json: Option<serde_json::Value>,
}

impl SyncProgress {
    /// Fresh snapshot at the start of `phase`
    pub fn starting(phase: SyncPhase, total_products: usize) -> Self {
        Self {
            phase,
            total_products,
            ..Default::default()
        }
    }

    /// Record counters and recompute the percentage
    pub fn with_counts(mut self, processed: usize, success: usize, fail: usize) -> Self {
        self.processed_products = processed;
        self.success_count = success;
        self.fail_count = fail;
        self.percentage = if self.total_products == 0 {
            100.0
        } else {
            (processed as f64 / self.total_products as f64 * 100.0).min(100.0)
        };
        self
    }
}

/// Aggregate result of phase 1 or phase 2
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOutcome {
    /// Items attempted
    pub total_products: usize,
    /// Items that succeeded
    pub success_count: usize,
    /// Items that failed
    pub fail_count: usize,
}

impl PhaseOutcome {
    /// Add another outcome's counters
    pub fn absorb(&mut self, other: PhaseOutcome) {
        self.total_products += other.total_products;
        self.success_count += other.success_count;
        self.fail_count += other.fail_count;
    }
}

/// Aggregate result of the recheck pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecheckOutcome {
    /// SKUs re-fetched
    pub total_checked: usize,
    /// SKUs now refreshed
    pub success_count: usize,
    /// SKUs still failing
    pub fail_count: usize,
    /// Refreshed SKUs now in stock
    pub in_stock_count: usize,
    /// Refreshed SKUs now out of stock
    pub out_of_stock_count: usize,
}

/// Everything one orchestrated run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Store id
    pub store_id: String,
    /// Phase 1 result when it ran
    pub fetch: Option<PhaseOutcome>,
    /// Recheck result when a snapshot existed
    pub recheck: Option<RecheckOutcome>,
    /// Phase 2 result when it ran
    pub publish: Option<PhaseOutcome>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}
