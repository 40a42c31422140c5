//! Two-phase sync engine
//!
//! - [`refresh`]: one SKU fetched, derived and written
//! - [`phase1`]: refresh every SKU of a store from its supplier
//! - [`recovery`]: recheck the SKUs the latest snapshot lists as failed
//! - [`phase2`]: publish dirty rows to the marketplace in batches
//! - [`orchestrator`]: phase 1, recheck and phase 2 as one run per store

pub mod orchestrator;
pub mod phase1;
pub mod phase2;
pub mod recovery;
pub mod refresh;

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::database::ProductStore;
use crate::models::SyncProgress;
use crate::providers::SupplierProvider;

pub use orchestrator::{RunMode, StoreJob, SyncOrchestrator};
pub use phase1::Phase1Runner;
pub use phase2::{Phase2Runner, Phase2Settings};
pub use recovery::FailureRecoveryService;
pub use refresh::{SkuRefresher, SkuResult};

/// Emit a progress snapshot every this many processed items
pub const PROGRESS_EVERY: usize = 5;

/// Everything one store run shares between its phases
#[derive(Clone)]
pub struct RunContext {
    /// Store being synced
    pub store_id: String,
    /// That store's configuration
    pub config: Arc<StoreConfig>,
    /// Supplier for the store
    pub provider: Arc<dyn SupplierProvider>,
    /// Product persistence
    pub products: Arc<dyn ProductStore>,
    /// Live progress for the store
    pub progress: Arc<watch::Sender<SyncProgress>>,
    /// Stops the run at its next safe point
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Replace the published progress snapshot
    pub fn publish(&self, progress: SyncProgress) {
        self.progress.send_replace(progress);
    }

    /// Whether failed SKUs are written out of stock
    pub fn skip_problematic(&self) -> bool {
        self.config
            .skip_problematic
            .unwrap_or_else(|| self.provider.defaults().skip_problematic)
    }

    /// Whether the run has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
