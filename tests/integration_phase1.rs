//! Phase 1 and recheck integration tests
//!
//! Runs the supplier refresh against a mock Vitacost service and a real
//! SQLite product store:
//! - Partial failure accounting and the failure snapshot
//! - Cancellation part-way through a store
//! - Recheck of the previous failures

mod common;

use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{create_test_store, mock_supplier, run_context, seed_catalog, skus, store_config, STORE_ID};
use feed_sync::database::ProductStore;
use feed_sync::engine::{FailureRecoveryService, Phase1Runner};
use feed_sync::failure_log::FailureLog;
use feed_sync::models::{Availability, SyncPhase};

/// Test 1: Ten SKUs with two failing give 8/2 and a two-row snapshot
#[tokio::test]
async fn test_partial_failure_snapshot() {
    let server = mock_supplier(&["SKU0003", "SKU0007"]).await;
    let products = create_test_store().await;
    seed_catalog(&products, &skus(10)).await;

    let dir = TempDir::new().unwrap();
    let log = FailureLog::new(dir.path());
    let (ctx, progress) = run_context(
        store_config(&server.uri()),
        products.clone(),
        CancellationToken::new(),
    );

    let outcome = Phase1Runner::new(ctx, log.clone()).run().await.unwrap();

    assert_eq!(outcome.total_products, 10);
    assert_eq!(outcome.success_count, 8);
    assert_eq!(outcome.fail_count, 2);

    let snapshot = log.latest_snapshot(STORE_ID).await.unwrap().unwrap();
    let mut failed: Vec<String> = log
        .read_snapshot(&snapshot)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.sku)
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["SKU0003", "SKU0007"]);

    // Refreshed rows are flagged in stock; failed rows keep their previous state
    let refreshed = products.get_product("SKU0000").await.unwrap().unwrap();
    assert_eq!(refreshed.availability, Availability::InStock);
    assert_eq!(refreshed.updated_flag, 1);

    let failed = products.get_product("SKU0003").await.unwrap().unwrap();
    assert_eq!(failed.availability, Availability::OutOfStock);
    assert_eq!(failed.updated_flag, 0);

    let last = progress.borrow().clone();
    assert_eq!(last.phase, SyncPhase::Fetch);
    assert_eq!(last.processed_products, 10);
    assert!((last.percentage - 100.0).abs() < f64::EPSILON);
}

/// Test 2: Cancelling part-way stops new starts and lets in-flight requests finish
#[tokio::test]
async fn test_cancel_midway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::in_stock_body())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let products = create_test_store().await;
    seed_catalog(&products, &skus(10)).await;

    let mut config = store_config(&server.uri());
    config.max_concurrent = 2;

    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let (ctx, _) = run_context(config, products.clone(), cancel.clone());
    let runner = Phase1Runner::new(ctx, FailureLog::new(dir.path()));
    let run = tokio::spawn(async move { runner.run().await });

    // Wait until four requests have been sent
    let started = loop {
        let received = server.received_requests().await.unwrap_or_default().len();
        if received >= 4 {
            break received;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    cancel.cancel();

    let outcome = run.await.unwrap().unwrap();
    let requested = server.received_requests().await.unwrap_or_default().len();

    assert!(requested < 10, "no new SKUs may start after cancel");
    assert!(requested <= started + 1);
    assert_eq!(outcome.total_products, requested);
    assert_eq!(outcome.success_count + outcome.fail_count, outcome.total_products);
    assert_eq!(outcome.fail_count, 0);
}

/// Test 3: Recheck refreshes SKUs that failed in phase 1
#[tokio::test]
async fn test_recheck_recovers_failures() {
    let products = create_test_store().await;
    seed_catalog(&products, &skus(5)).await;

    let dir = TempDir::new().unwrap();
    let log = FailureLog::new(dir.path());

    let failing = mock_supplier(&["SKU0001", "SKU0002"]).await;
    let (ctx, _) = run_context(
        store_config(&failing.uri()),
        products.clone(),
        CancellationToken::new(),
    );
    let outcome = Phase1Runner::new(ctx, log.clone()).run().await.unwrap();
    assert_eq!(outcome.fail_count, 2);

    // Supplier has recovered
    let healthy = mock_supplier(&[]).await;
    let (ctx, progress) = run_context(
        store_config(&healthy.uri()),
        products.clone(),
        CancellationToken::new(),
    );
    let recheck = FailureRecoveryService::new(ctx, log)
        .run()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(recheck.total_checked, 2);
    assert_eq!(recheck.success_count, 2);
    assert_eq!(recheck.in_stock_count, 2);
    assert_eq!(recheck.out_of_stock_count, 0);
    assert_eq!(healthy.received_requests().await.unwrap().len(), 2);

    let recovered = products.get_product("SKU0002").await.unwrap().unwrap();
    assert_eq!(recovered.availability, Availability::InStock);
    assert_eq!(progress.borrow().phase, SyncPhase::Recheck);
}

/// Test 4: Recheck without any snapshot does nothing
#[tokio::test]
async fn test_recheck_without_snapshot() {
    let server = mock_supplier(&[]).await;
    let products = create_test_store().await;
    let dir = TempDir::new().unwrap();

    let (ctx, _) = run_context(
        store_config(&server.uri()),
        products,
        CancellationToken::new(),
    );
    let result = FailureRecoveryService::new(ctx, FailureLog::new(dir.path()))
        .run()
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}
