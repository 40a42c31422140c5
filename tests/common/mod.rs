//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feed_sync::config::{HttpConfig, RetryConfig, StoreConfig};
use feed_sync::database::{ProductStore, SqliteProductStore};
use feed_sync::engine::RunContext;
use feed_sync::error::FeedError;
use feed_sync::marketplace::{FeedDocument, MarketplaceClient, RemoteFeedStatus};
use feed_sync::models::{FeedReport, ProductRecord, ReportIssue, ReportSummary, SyncProgress};
use feed_sync::providers::{ProviderContext, SupplierProvider, VitacostProvider};

pub const STORE_ID: &str = "vitacost";

/// Create an in-memory product store for testing
pub async fn create_test_store() -> Arc<SqliteProductStore> {
    Arc::new(
        SqliteProductStore::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// SKUs `SKU0000`, `SKU0001`, ...
pub fn skus(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("SKU{:04}", i)).collect()
}

/// Insert clean catalog rows for the test store
pub async fn seed_catalog(store: &SqliteProductStore, skus: &[String]) {
    let records: Vec<ProductRecord> = skus
        .iter()
        .map(|sku| ProductRecord::new(sku.clone(), STORE_ID))
        .collect();
    store
        .insert_products(&records)
        .await
        .expect("Failed to seed catalog");
}

/// Insert rows already flagged for publishing
pub async fn seed_dirty(store: &SqliteProductStore, count: usize, flag: i64) -> Vec<String> {
    let skus = skus(count);
    let records: Vec<ProductRecord> = skus
        .iter()
        .map(|sku| ProductRecord::new(sku.clone(), STORE_ID).with_updated_flag(flag))
        .collect();
    store
        .insert_products(&records)
        .await
        .expect("Failed to seed dirty rows");
    skus
}

/// Store configuration pointed at a mock supplier, without backoff
pub fn store_config(base_url: &str) -> StoreConfig {
    StoreConfig {
        provider: Some("vitacost".to_string()),
        base_url: Some(base_url.to_string()),
        requests_per_second: 100,
        max_concurrent: 5,
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Default::default()
    }
}

/// Vitacost provider for the given store configuration
pub fn vitacost(config: &StoreConfig) -> Arc<dyn SupplierProvider> {
    let ctx = ProviderContext {
        store_id: STORE_ID.to_string(),
        store: config.clone(),
        http: HttpConfig::default(),
    };
    Arc::new(VitacostProvider::new(&ctx).expect("Failed to create provider"))
}

/// Run context for the test store; returns the progress receiver alongside
pub fn run_context(
    config: StoreConfig,
    products: Arc<SqliteProductStore>,
    cancel: CancellationToken,
) -> (RunContext, watch::Receiver<SyncProgress>) {
    let (tx, rx) = watch::channel(SyncProgress::default());
    let provider = vitacost(&config);
    let ctx = RunContext {
        store_id: STORE_ID.to_string(),
        config: Arc::new(config),
        provider,
        products,
        progress: Arc::new(tx),
        cancel,
    };
    (ctx, rx)
}

/// Mock supplier answering every SKU in stock, except `failing` which get a 500
pub async fn mock_supplier(failing: &[&str]) -> MockServer {
    let server = MockServer::start().await;

    for sku in failing {
        Mock::given(method("GET"))
            .and(path(format!("/products/{}", sku)))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(in_stock_body()))
        .with_priority(5)
        .mount(&server)
        .await;

    server
}

/// Supplier payload for an in-stock item
pub fn in_stock_body() -> serde_json::Value {
    json!({
        "available": true,
        "stock": 25,
        "price": 12.5,
        "freight": 2.0,
        "brand": "Nature's Way"
    })
}

/// Marketplace fake that completes every feed at once
///
/// Reports reject the marketplace SKUs listed in `rejected`. With `fatal`
/// set every feed ends in `FATAL`. With `unattributed` set reports count
/// every message invalid but list no issues.
#[derive(Default)]
pub struct FakeMarketplace {
    pub rejected: HashSet<String>,
    pub fatal: bool,
    pub unattributed: bool,
    documents: Mutex<HashMap<String, Vec<String>>>,
    batch_sizes: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(skus: &[&str]) -> Self {
        Self {
            rejected: skus.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fatal: true,
            ..Default::default()
        }
    }

    pub fn unattributed() -> Self {
        Self {
            unattributed: true,
            ..Default::default()
        }
    }

    /// Message counts of every submitted document, in submission order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    /// Most feeds that were ever unfinished at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketplaceClient for FakeMarketplace {
    async fn submit_feed(&self, document: &FeedDocument) -> Result<String, FeedError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let mut sizes = self.batch_sizes.lock().unwrap();
        sizes.push(document.len());
        let feed_id = format!("FEED{}", sizes.len());

        let skus = document.message_skus().into_iter().map(|(_, sku)| sku).collect();
        self.documents.lock().unwrap().insert(feed_id.clone(), skus);
        Ok(feed_id)
    }

    async fn feed_status(&self, feed_id: &str) -> Result<RemoteFeedStatus, FeedError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fatal {
            return Ok(RemoteFeedStatus::from_remote("FATAL", None));
        }
        Ok(RemoteFeedStatus::from_remote(
            "DONE",
            Some(format!("{}-report", feed_id)),
        ))
    }

    async fn fetch_report(&self, document_id: &str) -> Result<FeedReport, FeedError> {
        let feed_id = document_id.trim_end_matches("-report");
        let skus = self
            .documents
            .lock()
            .unwrap()
            .get(feed_id)
            .cloned()
            .unwrap_or_default();

        let issues: Vec<ReportIssue> = skus
            .iter()
            .filter(|sku| self.rejected.contains(*sku))
            .map(|sku| ReportIssue {
                sku: Some(sku.clone()),
                code: "8541".to_string(),
                message: "SKU does not match any listing".to_string(),
                severity: Some("ERROR".to_string()),
                ..Default::default()
            })
            .collect();

        if self.unattributed {
            return Ok(FeedReport {
                summary: ReportSummary {
                    messages_processed: skus.len() as u64,
                    messages_accepted: 0,
                    messages_invalid: skus.len() as u64,
                    errors: skus.len() as u64,
                    warnings: 0,
                },
                ..Default::default()
            });
        }

        let invalid = issues.len() as u64;
        Ok(FeedReport {
            summary: ReportSummary {
                messages_processed: skus.len() as u64,
                messages_accepted: skus.len() as u64 - invalid,
                messages_invalid: invalid,
                errors: invalid,
                warnings: 0,
            },
            issues,
            ..Default::default()
        })
    }
}
