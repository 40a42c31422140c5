//! One cancellable run per store
//!
//! The orchestrator resolves a store's provider through the
//! [`ProviderFactory`], runs phase 1, the recheck and phase 2 in that order,
//! and always closes the provider afterwards. At most one run per store is
//! active at a time; each store has a `watch` channel carrying its latest
//! progress snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, HttpConfig, StoreConfig};
use crate::database::ProductStore;
use crate::error::PhaseError;
use crate::failure_log::FailureLog;
use crate::marketplace::MarketplaceClient;
use crate::models::{RunSummary, SyncPhase, SyncProgress};
use crate::providers::{ProviderContext, ProviderFactory};
use crate::sync::Syncable;

use super::{FailureRecoveryService, Phase1Runner, Phase2Runner, Phase2Settings, RunContext};

/// Which phases a run executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Phase 1, recheck, phase 2
    #[default]
    Full,
    /// Phase 1 and recheck only
    FetchOnly,
    /// Phase 2 only
    PublishOnly,
}

impl RunMode {
    fn fetches(self) -> bool {
        matches!(self, RunMode::Full | RunMode::FetchOnly)
    }

    fn publishes(self) -> bool {
        matches!(self, RunMode::Full | RunMode::PublishOnly)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::FetchOnly => write!(f, "fetch-only"),
            RunMode::PublishOnly => write!(f, "publish-only"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "full" => Ok(RunMode::Full),
            "fetch-only" | "fetch" => Ok(RunMode::FetchOnly),
            "publish-only" | "publish" => Ok(RunMode::PublishOnly),
            _ => Err(format!("Invalid run mode: {}", s)),
        }
    }
}

/// Coordinates store runs
pub struct SyncOrchestrator {
    stores: BTreeMap<String, Arc<StoreConfig>>,
    http: HttpConfig,
    factory: Arc<ProviderFactory>,
    products: Arc<dyn ProductStore>,
    marketplace: Arc<dyn MarketplaceClient>,
    failure_log: FailureLog,
    phase2: Phase2Settings,
    progress: HashMap<String, Arc<watch::Sender<SyncProgress>>>,
    runs: Mutex<HashMap<String, CancellationToken>>,
}

/// Removes a store's run entry when the run ends, however it ends
struct RunGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
    store_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.runs().remove(&self.store_id);
    }
}

impl SyncOrchestrator {
    pub fn new(
        config: &Config,
        factory: Arc<ProviderFactory>,
        products: Arc<dyn ProductStore>,
        marketplace: Arc<dyn MarketplaceClient>,
    ) -> Self {
        let stores: BTreeMap<String, Arc<StoreConfig>> = config
            .stores
            .iter()
            .map(|(id, store)| (id.clone(), Arc::new(store.clone())))
            .collect();
        let progress = stores
            .keys()
            .map(|id| {
                let (tx, _) = watch::channel(SyncProgress::default());
                (id.clone(), Arc::new(tx))
            })
            .collect();

        Self {
            stores,
            http: config.http.clone(),
            factory,
            products,
            marketplace,
            failure_log: FailureLog::new(&config.failure_log.dir),
            phase2: Phase2Settings::from_config(&config.marketplace),
            progress,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the phase 2 settings derived from configuration
    pub fn with_phase2_settings(mut self, settings: Phase2Settings) -> Self {
        self.phase2 = settings;
        self
    }

    /// Replace the failure snapshot directory
    pub fn with_failure_log(mut self, failure_log: FailureLog) -> Self {
        self.failure_log = failure_log;
        self
    }

    /// Configured store ids, sorted
    pub fn store_ids(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Live progress for a store
    pub fn subscribe(&self, store_id: &str) -> Option<watch::Receiver<SyncProgress>> {
        self.progress.get(store_id).map(|tx| tx.subscribe())
    }

    /// Latest progress snapshot for a store
    pub fn progress(&self, store_id: &str) -> Option<SyncProgress> {
        self.progress.get(store_id).map(|tx| tx.borrow().clone())
    }

    /// Whether a run for the store is active
    pub fn is_running(&self, store_id: &str) -> bool {
        self.runs().contains_key(store_id)
    }

    /// Ask a store's active run to stop; returns whether one was active
    pub fn cancel(&self, store_id: &str) -> bool {
        match self.runs().get(store_id) {
            Some(token) => {
                info!(store = store_id, "Cancelling sync run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every active run to stop
    pub fn cancel_all(&self) {
        for (store_id, token) in self.runs().iter() {
            info!(store = %store_id, "Cancelling sync run");
            token.cancel();
        }
    }

    /// Scheduler jobs for every enabled store
    pub fn jobs(self: &Arc<Self>) -> Vec<Arc<dyn Syncable>> {
        self.stores
            .iter()
            .filter(|(_, store)| store.enabled)
            .map(|(id, store)| {
                Arc::new(StoreJob {
                    orchestrator: Arc::clone(self),
                    store_id: id.clone(),
                    interval: Duration::from_secs(store.sync_interval_secs),
                }) as Arc<dyn Syncable>
            })
            .collect()
    }

    /// Run one store
    pub async fn run_store(&self, store_id: &str, mode: RunMode) -> Result<RunSummary, PhaseError> {
        let config = self
            .stores
            .get(store_id)
            .cloned()
            .ok_or_else(|| PhaseError::UnknownStore(store_id.to_string()))?;
        let progress = self
            .progress
            .get(store_id)
            .cloned()
            .ok_or_else(|| PhaseError::UnknownStore(store_id.to_string()))?;

        let cancel = CancellationToken::new();
        let _guard = self.begin(store_id, cancel.clone())?;

        let provider_id = config.provider_id(store_id).to_string();
        let provider_ctx = ProviderContext {
            store_id: store_id.to_string(),
            store: (*config).clone(),
            http: self.http.clone(),
        };
        let provider = match self.factory.get(&provider_id, &provider_ctx).await {
            Ok(provider) => provider,
            Err(e) => {
                error!(store = store_id, provider = %provider_id, error = %e, "Provider unavailable");
                progress.send_replace(SyncProgress {
                    error: Some(e.to_string()),
                    ..SyncProgress::default()
                });
                return Err(e.into());
            }
        };

        info!(store = store_id, provider = %provider_id, mode = %mode, "Sync run started");

        let ctx = RunContext {
            store_id: store_id.to_string(),
            config,
            provider: Arc::clone(&provider),
            products: Arc::clone(&self.products),
            progress: Arc::clone(&progress),
            cancel,
        };
        let result = self.execute(&ctx, mode).await;
        provider.close().await;

        match &result {
            Ok(summary) => {
                progress.send_modify(|p| p.phase = SyncPhase::Completed);
                info!(
                    store = store_id,
                    cancelled = summary.cancelled,
                    "Sync run finished"
                );
            }
            Err(e) => {
                let message = e.to_string();
                progress.send_modify(|p| {
                    p.error.get_or_insert(message);
                });
                error!(store = store_id, error = %e, "Sync run failed");
            }
        }

        result
    }

    async fn execute(&self, ctx: &RunContext, mode: RunMode) -> Result<RunSummary, PhaseError> {
        let mut summary = RunSummary {
            store_id: ctx.store_id.clone(),
            ..Default::default()
        };

        if mode.fetches() {
            let phase1 = Phase1Runner::new(ctx.clone(), self.failure_log.clone());
            summary.fetch = Some(phase1.run().await?);
            if ctx.is_cancelled() {
                summary.cancelled = true;
                return Ok(summary);
            }

            // The recheck only improves on phase 1; a broken snapshot does not stop the run.
            let recovery = FailureRecoveryService::new(ctx.clone(), self.failure_log.clone());
            match recovery.run().await {
                Ok(recheck) => summary.recheck = recheck,
                Err(e) => warn!(store = %ctx.store_id, error = %e, "Recheck skipped"),
            }
            if ctx.is_cancelled() {
                summary.cancelled = true;
                return Ok(summary);
            }
        }

        if mode.publishes() {
            let phase2 = Phase2Runner::new(
                ctx.clone(),
                Arc::clone(&self.marketplace),
                self.phase2.clone(),
            );
            summary.publish = Some(phase2.run().await?);
        }

        summary.cancelled = ctx.is_cancelled();
        Ok(summary)
    }

    /// Register a run, refusing a second one for the same store
    fn begin(&self, store_id: &str, cancel: CancellationToken) -> Result<RunGuard<'_>, PhaseError> {
        let mut runs = self.runs();
        if runs.contains_key(store_id) {
            warn!(store = store_id, "Sync already running");
            return Err(PhaseError::AlreadyRunning(store_id.to_string()));
        }
        runs.insert(store_id.to_string(), cancel);
        Ok(RunGuard {
            orchestrator: self,
            store_id: store_id.to_string(),
        })
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scheduler job running one store in full mode
pub struct StoreJob {
    orchestrator: Arc<SyncOrchestrator>,
    store_id: String,
    interval: Duration,
}

impl StoreJob {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, store_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            orchestrator,
            store_id: store_id.into(),
            interval,
        }
    }
}

#[async_trait]
impl Syncable for StoreJob {
    fn name(&self) -> &str {
        &self.store_id
    }

    fn sync_interval(&self) -> Duration {
        self.interval
    }

    async fn sync(&self) -> Result<RunSummary, PhaseError> {
        self.orchestrator.run_store(&self.store_id, RunMode::Full).await
    }

    fn cancel(&self) {
        self.orchestrator.cancel(&self.store_id);
    }
}
