//! Phase 2: publish dirty rows to the marketplace
//!
//! Flagged rows are cut into batches of at most
//! [`MARKETPLACE_MAX_BATCH`](crate::config::MARKETPLACE_MAX_BATCH) products and
//! published strictly one after another. Each batch is submitted, polled until
//! it reaches a terminal state or runs out of time, and only the SKUs its
//! report accepts get their flag cleared. A fatal, timed out or cancelled batch
//! leaves every row flagged for the next run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::MarketplaceConfig;
use crate::error::{FeedError, PhaseError, RetryableError};
use crate::marketplace::{content_digest, FeedArchive, FeedDocument, FeedOptions, MarketplaceClient};
use crate::models::{FeedStatus, FeedSubmission, PhaseOutcome, ProductRecord, SyncPhase, SyncProgress};

use super::RunContext;

/// Marketplace-wide settings for phase 2
#[derive(Debug, Clone)]
pub struct Phase2Settings {
    /// Wait between status polls
    pub poll_interval: Duration,
    /// Budget for one feed to reach a terminal state
    pub max_poll_duration: Duration,
    /// Remote feed type recorded on submissions
    pub feed_type: String,
    /// Message-level options
    pub options: FeedOptions,
    /// Where submitted bodies are copied, if anywhere
    pub archive: Option<FeedArchive>,
}

impl Phase2Settings {
    pub fn from_config(config: &MarketplaceConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_poll_duration: Duration::from_secs(config.max_poll_duration_secs),
            feed_type: config.feed_type.clone(),
            options: FeedOptions::from_config(config),
            archive: config.feeds_dir.as_ref().map(FeedArchive::new),
        }
    }
}

/// How polling one feed ended
#[derive(Debug, Clone, PartialEq)]
enum PollOutcome {
    /// Processing finished, with the report document when one was produced
    Done(Option<String>),
    /// Remote processing failed
    Fatal(String),
    /// The poll budget ran out
    TimedOut,
    /// Run cancelled while waiting; the remote job is left to finish
    Cancelled,
}

/// What one batch contributed to the phase
#[derive(Debug, Default)]
struct BatchResult {
    accepted: usize,
    report: Option<serde_json::Value>,
    cancelled: bool,
}

/// Runs phase 2 for one store
pub struct Phase2Runner {
    ctx: RunContext,
    marketplace: Arc<dyn MarketplaceClient>,
    settings: Phase2Settings,
}

impl Phase2Runner {
    pub fn new(
        ctx: RunContext,
        marketplace: Arc<dyn MarketplaceClient>,
        settings: Phase2Settings,
    ) -> Self {
        Self {
            ctx,
            marketplace,
            settings,
        }
    }

    /// Publish every flagged row of the store
    pub async fn run(&self) -> Result<PhaseOutcome, PhaseError> {
        let ctx = &self.ctx;
        let queries = ctx.provider.phase2_queries();
        let flag = ctx.config.update_flag_value;
        let pattern = ctx.config.sku_prefix.as_ref().map(|p| format!("{}%", p));

        let mut rows = ctx
            .products
            .select_updated(&queries, &ctx.store_id, flag, pattern)
            .await?;

        let skip = &ctx.config.skip_skus;
        if !skip.is_empty() {
            let before = rows.len();
            rows.retain(|p| !skip.contains(&p.sku) && !skip.contains(p.marketplace_sku()));
            if rows.len() < before {
                info!(store = %ctx.store_id, skipped = before - rows.len(), "Skip list applied");
            }
        }
        let batches: Vec<&[ProductRecord]> =
            rows.chunks(ctx.config.effective_batch_size()).collect();
        let total_batches = batches.len();

        info!(
            store = %ctx.store_id,
            products = rows.len(),
            batches = total_batches,
            "Publish started"
        );

        let mut outcome = PhaseOutcome::default();
        let mut last_report = None;
        ctx.publish(self.snapshot(rows.len(), &outcome, None, total_batches, None));

        for (index, batch) in batches.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(
                    store = %ctx.store_id,
                    remaining = total_batches - index,
                    "Publish cancelled before batch"
                );
                break;
            }

            ctx.publish(self.snapshot(
                rows.len(),
                &outcome,
                Some(index + 1),
                total_batches,
                last_report.clone(),
            ));

            let result = match self.publish_batch(index, batch).await {
                Ok(result) => result,
                Err(e) => {
                    error!(store = %ctx.store_id, batch = index + 1, error = %e, "Publish aborted");
                    ctx.publish(SyncProgress {
                        error: Some(e.to_string()),
                        ..self.snapshot(
                            rows.len(),
                            &outcome,
                            Some(index + 1),
                            total_batches,
                            last_report,
                        )
                    });
                    return Err(e.into());
                }
            };

            outcome.absorb(PhaseOutcome {
                total_products: batch.len(),
                success_count: result.accepted,
                fail_count: batch.len() - result.accepted,
            });
            if result.report.is_some() {
                last_report = result.report;
            }
            if result.cancelled {
                break;
            }
        }

        // Batches never attempted are not part of the totals.
        let total = outcome.total_products;
        ctx.publish(self.snapshot(total, &outcome, None, total_batches, last_report));

        info!(
            store = %ctx.store_id,
            total = outcome.total_products,
            accepted = outcome.success_count,
            rejected = outcome.fail_count,
            "Publish completed"
        );
        Ok(outcome)
    }

    /// Submit one batch and clear whatever its report accepts
    ///
    /// Only authentication failures end the phase; every other problem fails
    /// this batch and the caller moves on to the next one.
    async fn publish_batch(
        &self,
        index: usize,
        batch: &[ProductRecord],
    ) -> Result<BatchResult, FeedError> {
        let ctx = &self.ctx;
        let batch_number = index + 1;
        let document = FeedDocument::build(batch, &self.settings.options);

        let body = match document.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(store = %ctx.store_id, batch = batch_number, error = %e, "Feed serialization failed");
                return Ok(BatchResult::default());
            }
        };
        let digest = content_digest(&body);

        if let Some(archive) = &self.settings.archive {
            if let Err(e) = archive
                .save(&ctx.store_id, batch_number, &body, Utc::now())
                .await
            {
                warn!(store = %ctx.store_id, batch = batch_number, error = %e, "Failed to archive feed");
            }
        }

        let feed_id = match self.marketplace.submit_feed(&document).await {
            Ok(id) => id,
            Err(e @ FeedError::Auth(_)) => return Err(e),
            Err(e) => {
                error!(store = %ctx.store_id, batch = batch_number, error = %e, "Feed submission failed");
                return Ok(BatchResult::default());
            }
        };

        info!(
            store = %ctx.store_id,
            batch = batch_number,
            feed_id = %feed_id,
            messages = document.len(),
            "Feed submitted"
        );

        let mut submission = FeedSubmission::submitted(
            feed_id,
            ctx.store_id.clone(),
            self.settings.feed_type.clone(),
            index,
            digest,
        );
        if let Err(e) = ctx.products.record_submission(&submission).await {
            warn!(store = %ctx.store_id, feed_id = %submission.id, error = %e, "Failed to record submission");
        }

        let mut result = BatchResult::default();
        match self.poll(&mut submission).await? {
            PollOutcome::Done(Some(document_id)) => {
                self.settle(&mut submission, FeedStatus::Done).await;
                match self.marketplace.fetch_report(&document_id).await {
                    Ok(report) => {
                        let accepted: HashSet<String> = report
                            .accepted_skus(&document.message_skus())
                            .into_iter()
                            .collect();
                        result.accepted = self.clear_accepted(batch, &accepted).await;
                        result.report = serde_json::to_value(&report).ok();
                        submission.report_json = serde_json::to_string(&report).ok();
                        self.save_submission(&submission).await;
                    }
                    Err(e @ FeedError::Auth(_)) => return Err(e),
                    Err(e) => {
                        warn!(
                            store = %ctx.store_id,
                            feed_id = %submission.id,
                            error = %e,
                            "Report unavailable, batch left flagged"
                        );
                    }
                }
            }
            PollOutcome::Done(None) => {
                self.settle(&mut submission, FeedStatus::Done).await;
                warn!(
                    store = %ctx.store_id,
                    feed_id = %submission.id,
                    "Feed done without a report, batch left flagged"
                );
            }
            PollOutcome::Fatal(reason) => {
                self.settle(&mut submission, FeedStatus::Fatal).await;
                error!(
                    store = %ctx.store_id,
                    feed_id = %submission.id,
                    reason = %reason,
                    "Feed processing failed"
                );
            }
            PollOutcome::TimedOut => {
                self.settle(&mut submission, FeedStatus::Fatal).await;
                error!(
                    store = %ctx.store_id,
                    feed_id = %submission.id,
                    waited_secs = self.settings.max_poll_duration.as_secs(),
                    "Feed polling timed out"
                );
            }
            PollOutcome::Cancelled => {
                info!(
                    store = %ctx.store_id,
                    feed_id = %submission.id,
                    "Stopped polling on cancellation"
                );
                result.cancelled = true;
            }
        }

        Ok(result)
    }

    /// Poll until a terminal status, the deadline, or cancellation
    ///
    /// Polls once right away. Transient status errors are logged and polled
    /// again; an authentication failure ends the phase.
    async fn poll(&self, submission: &mut FeedSubmission) -> Result<PollOutcome, FeedError> {
        let ctx = &self.ctx;
        let deadline = Instant::now() + self.settings.max_poll_duration;

        loop {
            match self.marketplace.feed_status(&submission.id).await {
                Ok(remote) => match remote.status {
                    FeedStatus::Done => return Ok(PollOutcome::Done(remote.result_document_id)),
                    FeedStatus::Fatal => return Ok(PollOutcome::Fatal(remote.raw_status)),
                    FeedStatus::Processing if submission.status == FeedStatus::Submitted => {
                        self.settle(submission, FeedStatus::Processing).await;
                    }
                    _ => {
                        debug!(
                            store = %ctx.store_id,
                            feed_id = %submission.id,
                            status = %remote.raw_status,
                            "Feed still processing"
                        );
                    }
                },
                Err(e @ FeedError::Auth(_)) => return Err(e),
                Err(e) if e.is_retryable() => {
                    warn!(
                        store = %ctx.store_id,
                        feed_id = %submission.id,
                        error = %e,
                        "Status poll failed, will poll again"
                    );
                }
                Err(e) => return Ok(PollOutcome::Fatal(e.to_string())),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(PollOutcome::TimedOut);
            }
            let wait = self.settings.poll_interval.min(deadline - now);

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Clear the flag of every batch row whose marketplace SKU was accepted
    async fn clear_accepted(&self, batch: &[ProductRecord], accepted: &HashSet<String>) -> usize {
        let ctx = &self.ctx;
        let skus: Vec<String> = batch
            .iter()
            .filter(|p| accepted.contains(p.marketplace_sku()))
            .map(|p| p.sku.clone())
            .collect();
        if skus.is_empty() {
            return 0;
        }

        let queries = ctx.provider.phase2_queries();
        match ctx
            .products
            .clear_updated(&queries, &ctx.store_id, ctx.config.update_flag_value, &skus)
            .await
        {
            Ok(cleared) => {
                debug!(store = %ctx.store_id, accepted = skus.len(), cleared = cleared, "Flags cleared");
                skus.len()
            }
            Err(e) => {
                error!(store = %ctx.store_id, error = %e, "Failed to clear flags, batch left flagged");
                0
            }
        }
    }

    async fn settle(&self, submission: &mut FeedSubmission, status: FeedStatus) {
        if let Err(e) = submission.transition(status) {
            warn!(store = %self.ctx.store_id, error = %e, "Ignored submission transition");
            return;
        }
        self.save_submission(submission).await;
    }

    async fn save_submission(&self, submission: &FeedSubmission) {
        if let Err(e) = self.ctx.products.update_submission(submission).await {
            warn!(
                store = %self.ctx.store_id,
                feed_id = %submission.id,
                error = %e,
                "Failed to update submission"
            );
        }
    }

    fn snapshot(
        &self,
        total: usize,
        outcome: &PhaseOutcome,
        current_batch: Option<usize>,
        total_batches: usize,
        report: Option<serde_json::Value>,
    ) -> SyncProgress {
        SyncProgress {
            current_batch,
            total_batches: Some(total_batches),
            report_json: report,
            ..SyncProgress::starting(SyncPhase::Publish, total).with_counts(
                outcome.total_products,
                outcome.success_count,
                outcome.fail_count,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::database::MockProductStore;
    use crate::error::SyncError;
    use crate::marketplace::{MockMarketplaceClient, RemoteFeedStatus};
    use crate::models::{FeedReport, ReportIssue, ReportSummary};
    use crate::providers::{MockSupplierProvider, Phase2Queries};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    fn rows(count: usize) -> Vec<ProductRecord> {
        (0..count)
            .map(|i| ProductRecord::new(format!("SKU{:05}", i), "acme").with_updated_flag(1))
            .collect()
    }

    fn provider() -> MockSupplierProvider {
        let mut mock = MockSupplierProvider::new();
        mock.expect_phase2_queries()
            .returning(Phase2Queries::by_marketplace_sku);
        mock
    }

    fn products(rows: Vec<ProductRecord>) -> MockProductStore {
        let mut mock = MockProductStore::new();
        mock.expect_select_updated()
            .returning(move |_, _, _, _| Ok(rows.clone()));
        mock.expect_record_submission().returning(|_| Ok(()));
        mock.expect_update_submission().returning(|_| Ok(()));
        mock
    }

    fn settings() -> Phase2Settings {
        Phase2Settings {
            poll_interval: Duration::from_secs(30),
            max_poll_duration: Duration::from_secs(600),
            feed_type: "JSON_LISTINGS_FEED".to_string(),
            options: FeedOptions::from_config(&MarketplaceConfig::default()),
            archive: None,
        }
    }

    fn runner(
        products: MockProductStore,
        marketplace: MockMarketplaceClient,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> (Phase2Runner, watch::Receiver<SyncProgress>) {
        runner_with(products, Arc::new(marketplace), batch_size, cancel)
    }

    fn runner_with(
        products: MockProductStore,
        marketplace: Arc<dyn MarketplaceClient>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> (Phase2Runner, watch::Receiver<SyncProgress>) {
        let (tx, rx) = watch::channel(SyncProgress::default());
        let ctx = RunContext {
            store_id: "acme".to_string(),
            config: Arc::new(StoreConfig {
                batch_size,
                ..Default::default()
            }),
            provider: Arc::new(provider()),
            products: Arc::new(products),
            progress: Arc::new(tx),
            cancel,
        };
        (Phase2Runner::new(ctx, marketplace, settings()), rx)
    }

    /// Report that accepts every message of a batch of `count`
    fn clean(count: u64) -> FeedReport {
        FeedReport {
            summary: ReportSummary {
                messages_processed: count,
                messages_accepted: count,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Marketplace whose feeds are done at once with the given report
    fn done_marketplace(report: FeedReport, sizes: Arc<Mutex<Vec<usize>>>) -> MockMarketplaceClient {
        let mut mock = MockMarketplaceClient::new();
        mock.expect_submit_feed().returning(move |doc| {
            let mut sizes = sizes.lock().unwrap();
            sizes.push(doc.len());
            Ok(format!("F{}", sizes.len()))
        });
        mock.expect_feed_status()
            .returning(|id| Ok(RemoteFeedStatus::from_remote("DONE", Some(format!("{}-report", id)))));
        mock.expect_fetch_report()
            .returning(move |_| Ok(report.clone()));
        mock
    }

    fn rejecting(sku: &str) -> FeedReport {
        FeedReport {
            summary: ReportSummary {
                messages_processed: 3,
                messages_accepted: 2,
                messages_invalid: 1,
                errors: 1,
                warnings: 0,
            },
            issues: vec![ReportIssue {
                sku: Some(sku.to_string()),
                code: "90220".to_string(),
                message: "invalid quantity".to_string(),
                severity: Some("ERROR".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    // Test 1: Rows are published in capped batches, in order
    #[tokio::test]
    async fn test_batches_in_order() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let mut store = products(rows(25));
        let cleared = Arc::new(AtomicUsize::new(0));
        let counter = cleared.clone();
        store
            .expect_clear_updated()
            .times(3)
            .returning(move |_, source, flag, skus| {
                assert_eq!(source, "acme");
                assert_eq!(flag, 1);
                counter.fetch_add(skus.len(), Ordering::SeqCst);
                Ok(skus.len() as u64)
            });

        let (runner, progress) = runner(
            store,
            done_marketplace(clean(10), sizes.clone()),
            10,
            CancellationToken::new(),
        );
        let outcome = runner.run().await.unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![10, 10, 5]);
        assert_eq!(cleared.load(Ordering::SeqCst), 25);
        assert_eq!(
            outcome,
            PhaseOutcome {
                total_products: 25,
                success_count: 25,
                fail_count: 0
            }
        );
        assert_eq!(progress.borrow().total_batches, Some(3));
        assert_eq!(progress.borrow().phase, SyncPhase::Publish);
    }

    // Test 2: Only SKUs the report accepts are cleared
    #[tokio::test]
    async fn test_only_accepted_cleared() {
        let mut store = products(rows(3));
        store
            .expect_clear_updated()
            .withf(|_, _, _, skus| *skus == ["SKU00000".to_string(), "SKU00002".to_string()])
            .times(1)
            .returning(|_, _, _, skus| Ok(skus.len() as u64));

        let (runner, progress) = runner(
            store,
            done_marketplace(rejecting("SKU00001"), Arc::new(Mutex::new(Vec::new()))),
            10,
            CancellationToken::new(),
        );
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.fail_count, 1);
        assert!(progress.borrow().report_json.is_some());
    }

    // Test 3: Rejections are matched on the marketplace SKU and cleared by primary SKU
    #[tokio::test]
    async fn test_secondary_sku_mapping() {
        let batch = vec![
            ProductRecord::new("A", "acme").with_secondary_sku("M-A"),
            ProductRecord::new("B", "acme").with_secondary_sku("M-B"),
        ];
        let mut store = products(batch);
        store
            .expect_clear_updated()
            .withf(|_, _, _, skus| *skus == ["B".to_string()])
            .times(1)
            .returning(|_, _, _, _| Ok(1));

        let (runner, _) = runner(
            store,
            done_marketplace(rejecting("M-A"), Arc::new(Mutex::new(Vec::new()))),
            10,
            CancellationToken::new(),
        );

        assert_eq!(runner.run().await.unwrap().success_count, 1);
    }

    // Test 4: A fatal feed leaves every row flagged
    #[tokio::test]
    async fn test_fatal_leaves_flagged() {
        let mut store = MockProductStore::new();
        store
            .expect_select_updated()
            .returning(|_, _, _, _| Ok(rows(3)));
        store.expect_record_submission().returning(|_| Ok(()));
        store
            .expect_update_submission()
            .withf(|s| s.status == FeedStatus::Fatal)
            .times(1)
            .returning(|_| Ok(()));
        store.expect_clear_updated().never();

        let mut marketplace = MockMarketplaceClient::new();
        marketplace
            .expect_submit_feed()
            .returning(|_| Ok("F1".to_string()));
        marketplace
            .expect_feed_status()
            .returning(|_| Ok(RemoteFeedStatus::from_remote("FATAL", None)));
        marketplace.expect_fetch_report().never();

        let (runner, _) = runner(store, marketplace, 10, CancellationToken::new());
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.fail_count, 3);
    }

    // Test 5: Polling gives up at the deadline
    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout() {
        let mut store = products(rows(2));
        store.expect_clear_updated().never();

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut marketplace = MockMarketplaceClient::new();
        marketplace
            .expect_submit_feed()
            .returning(|_| Ok("F1".to_string()));
        marketplace.expect_feed_status().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteFeedStatus::from_remote("IN_PROGRESS", None))
        });

        let (runner, _) = runner(store, marketplace, 10, CancellationToken::new());
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.fail_count, 2);
        // Immediate poll plus one per 30s over 600s
        assert_eq!(polls.load(Ordering::SeqCst), 21);
    }

    // Test 6: Transient status errors are polled through
    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_error() {
        let mut store = products(rows(2));
        store
            .expect_clear_updated()
            .times(1)
            .returning(|_, _, _, skus| Ok(skus.len() as u64));

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut marketplace = MockMarketplaceClient::new();
        marketplace
            .expect_submit_feed()
            .returning(|_| Ok("F1".to_string()));
        marketplace.expect_feed_status().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FeedError::Sync(SyncError::ServerError(503)))
            } else {
                Ok(RemoteFeedStatus::from_remote("DONE", Some("R1".to_string())))
            }
        });
        marketplace
            .expect_fetch_report()
            .returning(|_| Ok(clean(2)));

        let (runner, _) = runner(store, marketplace, 10, CancellationToken::new());

        assert_eq!(runner.run().await.unwrap().success_count, 2);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    // Test 7: Authentication failure aborts the phase
    #[tokio::test]
    async fn test_auth_aborts() {
        let mut store = products(rows(3));
        store.expect_clear_updated().never();

        let mut marketplace = MockMarketplaceClient::new();
        marketplace
            .expect_submit_feed()
            .times(1)
            .returning(|_| Err(FeedError::Auth("invalid_grant".to_string())));

        let (runner, progress) = runner(store, marketplace, 2, CancellationToken::new());
        let result = runner.run().await;

        assert!(matches!(
            result,
            Err(PhaseError::Marketplace(FeedError::Auth(_)))
        ));
        assert!(progress.borrow().error.is_some());
    }

    // Test 8: A failed submission fails its batch only
    #[tokio::test]
    async fn test_submit_failure_continues() {
        let mut store = products(rows(4));
        store
            .expect_clear_updated()
            .withf(|_, _, _, skus| skus.len() == 2 && skus[0] == "SKU00002")
            .times(1)
            .returning(|_, _, _, skus| Ok(skus.len() as u64));

        let submits = Arc::new(AtomicUsize::new(0));
        let counter = submits.clone();
        let mut marketplace = MockMarketplaceClient::new();
        marketplace.expect_submit_feed().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FeedError::Sync(SyncError::ClientError(400)))
            } else {
                Ok("F2".to_string())
            }
        });
        marketplace
            .expect_feed_status()
            .returning(|_| Ok(RemoteFeedStatus::from_remote("DONE", Some("R2".to_string()))));
        marketplace
            .expect_fetch_report()
            .returning(|_| Ok(clean(2)));

        let (runner, _) = runner(store, marketplace, 2, CancellationToken::new());
        let outcome = runner.run().await.unwrap();

        assert_eq!(
            outcome,
            PhaseOutcome {
                total_products: 4,
                success_count: 2,
                fail_count: 2
            }
        );
    }

    // Test 9: Cancellation while polling stops after the current batch
    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_polling() {
        let mut store = products(rows(4));
        store.expect_clear_updated().never();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut marketplace = MockMarketplaceClient::new();
        marketplace
            .expect_submit_feed()
            .times(1)
            .returning(|_| Ok("F1".to_string()));
        marketplace.expect_feed_status().returning(move |_| {
            trigger.cancel();
            Ok(RemoteFeedStatus::from_remote("IN_QUEUE", None))
        });

        let (runner, progress) = runner(store, marketplace, 2, cancel);
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.total_products, 2);
        assert_eq!(outcome.fail_count, 2);
        assert_eq!(progress.borrow().total_products, 2);
    }

    // Test 10: Nothing flagged means nothing submitted
    #[tokio::test]
    async fn test_nothing_to_publish() {
        let mut marketplace = MockMarketplaceClient::new();
        marketplace.expect_submit_feed().never();

        let (runner, progress) = runner(products(Vec::new()), marketplace, 10, CancellationToken::new());

        assert_eq!(runner.run().await.unwrap(), PhaseOutcome::default());
        assert_eq!(progress.borrow().total_batches, Some(0));
        assert!((progress.borrow().percentage - 100.0).abs() < f64::EPSILON);
    }

    // Test 11: SKU prefix narrows the selection
    #[tokio::test]
    async fn test_sku_prefix_pattern() {
        let mut store = MockProductStore::new();
        store
            .expect_select_updated()
            .withf(|_, _, _, pattern| pattern.as_deref() == Some("VC%"))
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let (tx, _) = watch::channel(SyncProgress::default());
        let ctx = RunContext {
            store_id: "acme".to_string(),
            config: Arc::new(StoreConfig {
                sku_prefix: Some("VC".to_string()),
                ..Default::default()
            }),
            provider: Arc::new(provider()),
            products: Arc::new(store),
            progress: Arc::new(tx),
            cancel: CancellationToken::new(),
        };
        let runner = Phase2Runner::new(ctx, Arc::new(MockMarketplaceClient::new()), settings());

        runner.run().await.unwrap();
    }

    // Test 12: A token rejected again after refresh aborts before the next batch
    #[tokio::test]
    async fn test_rejected_token_aborts_phase() {
        use crate::config::{HttpConfig, RetryConfig};
        use crate::marketplace::SpApiClient;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "Atza|token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/feeds/2021-06-30/documents"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let config = MarketplaceConfig {
            endpoint: server.uri(),
            token_endpoint: format!("{}/auth/o2/token", server.uri()),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            seller_id: "SELLER".to_string(),
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 0,
                max_backoff_ms: 0,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        };
        let client = SpApiClient::new(&config, &HttpConfig::default()).unwrap();

        let mut store = products(rows(4));
        store.expect_clear_updated().never();
        let (runner, progress) =
            runner_with(store, Arc::new(client), 2, CancellationToken::new());
        let result = runner.run().await;

        assert!(matches!(
            result,
            Err(PhaseError::Marketplace(FeedError::Auth(_)))
        ));
        assert!(progress.borrow().error.is_some());
    }

    // Test 13: Invalid messages the issues do not account for keep the batch flagged
    #[tokio::test]
    async fn test_unexplained_invalid_keeps_flags() {
        let mut store = products(rows(3));
        store.expect_clear_updated().never();

        let report = FeedReport {
            summary: ReportSummary {
                messages_processed: 3,
                messages_accepted: 0,
                messages_invalid: 3,
                errors: 3,
                warnings: 0,
            },
            ..Default::default()
        };
        let (runner, _) = runner(
            store,
            done_marketplace(report, Arc::new(Mutex::new(Vec::new()))),
            10,
            CancellationToken::new(),
        );
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.fail_count, 3);
    }

    // Test 14: Skip-listed SKUs are left out of every batch
    #[tokio::test]
    async fn test_skip_list() {
        let mut store = products(rows(3));
        store
            .expect_clear_updated()
            .withf(|_, _, _, skus| *skus == ["SKU00000".to_string(), "SKU00002".to_string()])
            .times(1)
            .returning(|_, _, _, skus| Ok(skus.len() as u64));

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let (tx, _) = watch::channel(SyncProgress::default());
        let ctx = RunContext {
            store_id: "acme".to_string(),
            config: Arc::new(StoreConfig {
                skip_skus: ["SKU00001".to_string()].into_iter().collect(),
                ..Default::default()
            }),
            provider: Arc::new(provider()),
            products: Arc::new(store),
            progress: Arc::new(tx),
            cancel: CancellationToken::new(),
        };
        let runner = Phase2Runner::new(
            ctx,
            Arc::new(done_marketplace(clean(2), sizes.clone())),
            settings(),
        );
        let outcome = runner.run().await.unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![2]);
        assert_eq!(outcome.total_products, 2);
        assert_eq!(outcome.success_count, 2);
    }
}
