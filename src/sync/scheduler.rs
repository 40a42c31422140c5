//! Periodic scheduler for store sync runs
//!
//! Each registered job runs once shortly after startup and then on its own
//! interval, with a random jitter so stores sharing a supplier do not start
//! at the same instant. A [`ManualSyncHandle`] triggers an immediate run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::PhaseError;
use crate::models::RunSummary;

/// Status of one scheduled job
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// When the last run finished
    pub last_sync: Option<DateTime<Utc>>,
    /// Last run result; errors are kept as their message
    pub last_result: Option<Result<RunSummary, String>>,
    /// Estimated start of the next scheduled run
    pub next_sync: Option<DateTime<Utc>>,
    /// Whether a run is currently in progress
    pub in_progress: bool,
}

/// Something the scheduler can run periodically
#[async_trait]
pub trait Syncable: Send + Sync {
    /// Job name, unique within one scheduler
    fn name(&self) -> &str;

    /// Interval between runs
    fn sync_interval(&self) -> Duration;

    /// Perform one run
    async fn sync(&self) -> Result<RunSummary, PhaseError>;

    /// Ask an in-flight run to stop at its next safe point
    fn cancel(&self) {}
}

struct ManualSyncRequest {
    name: String,
    response: oneshot::Sender<Result<RunSummary, PhaseError>>,
}

/// Scheduler driving a set of [`Syncable`] jobs
pub struct SyncScheduler {
    config: SchedulerConfig,
    jobs: Vec<Arc<dyn Syncable>>,
    status: Arc<RwLock<HashMap<String, SyncStatus>>>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_sync_rx: mpsc::Receiver<ManualSyncRequest>,
    manual_sync_tx: mpsc::Sender<ManualSyncRequest>,
}

impl SyncScheduler {
    /// Create a scheduler stopped by `shutdown_rx`
    pub fn new(
        config: SchedulerConfig,
        jobs: Vec<Arc<dyn Syncable>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_sync_tx, manual_sync_rx) = mpsc::channel(32);

        let status = jobs
            .iter()
            .map(|j| (j.name().to_string(), SyncStatus::default()))
            .collect();

        Self {
            config,
            jobs,
            status: Arc::new(RwLock::new(status)),
            shutdown_rx,
            manual_sync_rx,
            manual_sync_tx,
        }
    }

    /// Get a handle for triggering manual runs
    pub fn manual_sync_handle(&self) -> ManualSyncHandle {
        ManualSyncHandle {
            tx: self.manual_sync_tx.clone(),
        }
    }

    /// Shared view of every job's status
    pub fn status_handle(&self) -> Arc<RwLock<HashMap<String, SyncStatus>>> {
        self.status.clone()
    }

    /// Snapshot of every job's status
    pub async fn get_status(&self) -> HashMap<String, SyncStatus> {
        self.status.read().await.clone()
    }

    /// Run until the shutdown signal fires
    pub async fn run(mut self) {
        info!(jobs = self.jobs.len(), "Starting sync scheduler");

        if self.config.initial_delay_secs > 0 {
            debug!(
                delay_secs = self.config.initial_delay_secs,
                "Waiting for initial delay"
            );
            tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        }

        let mut handles = Vec::new();
        let (task_shutdown_tx, _) = broadcast::channel::<()>(1);

        for job in &self.jobs {
            let job = job.clone();
            let status = self.status.clone();
            let config = self.config.clone();
            let task_shutdown_rx = task_shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                Self::run_job(job, status, config, task_shutdown_rx).await;
            }));
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    for job in &self.jobs {
                        job.cancel();
                    }
                    let _ = task_shutdown_tx.send(());
                    break;
                }
                Some(request) = self.manual_sync_rx.recv() => {
                    self.handle_manual_sync(request).await;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("Sync scheduler stopped");
    }

    async fn run_job(
        job: Arc<dyn Syncable>,
        status: Arc<RwLock<HashMap<String, SyncStatus>>>,
        config: SchedulerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let name = job.name().to_string();
        let interval = job.sync_interval();

        info!(store = %name, "Performing initial sync");
        let _ = Self::perform_sync(&job, &status, &config).await;

        let jitter = random_jitter(config.jitter_secs);
        let next_sync = Instant::now() + interval + Duration::from_secs(jitter);
        debug!(
            store = %name,
            interval_secs = interval.as_secs(),
            jitter_secs = jitter,
            "Scheduled next sync"
        );

        let mut interval_timer = interval_at(next_sync, interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(store = %name, "Sync task shutting down");
                    break;
                }
                _ = interval_timer.tick() => {
                    let jitter = random_jitter(config.jitter_secs);
                    if jitter > 0 {
                        tokio::time::sleep(Duration::from_secs(jitter)).await;
                    }

                    info!(store = %name, "Performing scheduled sync");
                    let _ = Self::perform_sync(&job, &status, &config).await;
                }
            }
        }
    }

    async fn perform_sync(
        job: &Arc<dyn Syncable>,
        status: &Arc<RwLock<HashMap<String, SyncStatus>>>,
        config: &SchedulerConfig,
    ) -> Result<RunSummary, PhaseError> {
        let name = job.name().to_string();

        if let Some(s) = status.write().await.get_mut(&name) {
            s.in_progress = true;
        }

        let budget = Duration::from_secs(config.sync_timeout_secs);
        let run = job.sync();
        tokio::pin!(run);

        let result = match tokio::time::timeout(budget, &mut run).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    store = %name,
                    timeout_secs = config.sync_timeout_secs,
                    "Sync timed out, cancelling"
                );
                // Let the run reach a safe point so provider resources are released.
                job.cancel();
                let _ = run.await;
                Err(PhaseError::TimedOut(config.sync_timeout_secs))
            }
        };

        let mut status_map = status.write().await;
        if let Some(s) = status_map.get_mut(&name) {
            s.in_progress = false;
            s.last_sync = Some(Utc::now());

            match &result {
                Ok(summary) => {
                    info!(
                        store = %name,
                        cancelled = summary.cancelled,
                        "Sync completed"
                    );
                    s.last_result = Some(Ok(summary.clone()));
                }
                Err(err) => {
                    warn!(store = %name, error = %err, "Sync failed");
                    s.last_result = Some(Err(err.to_string()));
                }
            }

            s.next_sync = chrono::Duration::from_std(job.sync_interval())
                .ok()
                .map(|d| Utc::now() + d);
        }

        result
    }

    async fn handle_manual_sync(&self, request: ManualSyncRequest) {
        let job = self.jobs.iter().find(|j| j.name() == request.name);

        let result = match job {
            Some(job) => {
                info!(store = %request.name, "Manual sync triggered");
                Self::perform_sync(job, &self.status, &self.config).await
            }
            None => {
                warn!(store = %request.name, "Manual sync requested for unknown store");
                Err(PhaseError::UnknownStore(request.name.clone()))
            }
        };

        let _ = request.response.send(result);
    }
}

fn random_jitter(jitter_secs: u64) -> u64 {
    if jitter_secs > 0 {
        rand::thread_rng().gen_range(0..jitter_secs)
    } else {
        0
    }
}

/// Handle for triggering manual runs
#[derive(Clone)]
pub struct ManualSyncHandle {
    tx: mpsc::Sender<ManualSyncRequest>,
}

impl ManualSyncHandle {
    /// Run the named job now and wait for its result
    pub async fn trigger_sync(&self, name: &str) -> Result<RunSummary, PhaseError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(ManualSyncRequest {
                name: name.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| PhaseError::SchedulerStopped)?;

        response_rx.await.map_err(|_| PhaseError::SchedulerStopped)?
    }
}
