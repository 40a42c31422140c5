//! Best Buy supplier provider
//!
//! The Best Buy proxy answers `GET {base_url}/{sku}` with
//! `{"success": true, "data": {"availability": "InStock", "price": 19.99, "brand": "..."}}`.
//! It has no stock count and no delivery window, so availability comes from
//! the availability string alone and the lead time from the store default.
//!
//! The proxy occasionally returns implausible answers (out of stock with a
//! price, a zero price, prices outside a sane range). Such answers are
//! re-requested a few times and the most plausible one is kept.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{ProviderError, SyncError};
use crate::models::ProductDelta;
use crate::sync::HttpClient;

use super::{
    derive_delta, store_option, FetchOutcome, Phase2Queries, ProviderContext, ProviderDefaults,
    ProviderKind, RawSupplierData, SupplierProvider,
};

/// Base URL used when the store does not configure one
pub const DEFAULT_BESTBUY_BASE_URL: &str = "http://localhost:3005/bb/api";

const DEFAULT_SUSPICIOUS_ATTEMPTS: u32 = 3;
const DEFAULT_SUSPICIOUS_DELAY_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<ApiProduct>,
}

#[derive(Debug, Deserialize)]
struct ApiProduct {
    #[serde(default)]
    availability: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    brand: Option<String>,
}

/// How implausible a supplier answer looks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Probably fine
    Low,
    /// Likely a proxy glitch
    Medium,
    /// Almost certainly wrong
    High,
}

impl Severity {
    fn delay_multiplier(self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 1.5,
            Severity::High => 2.0,
        }
    }
}

/// Why an answer was judged implausible
#[derive(Debug, Clone, PartialEq)]
pub struct Suspicion {
    /// Short description for logs
    pub reason: String,
    /// How much to distrust it
    pub severity: Severity,
}

/// Best Buy provider
pub struct BestBuyProvider {
    id: String,
    base_url: String,
    http_client: HttpClient,
    suspicious_attempts: u32,
    suspicious_delay_ms: u64,
    requests: AtomicU64,
}

impl BestBuyProvider {
    /// Create a provider for the given store
    pub fn new(ctx: &ProviderContext) -> Result<Self, ProviderError> {
        let http_client = HttpClient::new(&ctx.http)
            .map_err(|e| ProviderError::InitializationFailed(e.to_string()))?;
        Self::with_http_client(ctx, http_client)
    }

    /// Create a provider with an existing HTTP client
    pub fn with_http_client(
        ctx: &ProviderContext,
        http_client: HttpClient,
    ) -> Result<Self, ProviderError> {
        let suspicious_attempts =
            store_option(&ctx.store, "suspicious_attempts", DEFAULT_SUSPICIOUS_ATTEMPTS)?;
        let suspicious_delay_ms =
            store_option(&ctx.store, "suspicious_delay_ms", DEFAULT_SUSPICIOUS_DELAY_MS)?;

        Ok(Self {
            id: ctx.store_id.clone(),
            base_url: ctx
                .store
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BESTBUY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_client,
            suspicious_attempts: suspicious_attempts.max(1),
            suspicious_delay_ms,
            requests: AtomicU64::new(0),
        })
    }

    async fn fetch_once(&self, sku: &str) -> Result<FetchOutcome, SyncError> {
        let url = format!("{}/{}", self.base_url, sku);
        self.requests.fetch_add(1, Ordering::Relaxed);

        let envelope: ApiEnvelope = match self.http_client.get_json(&url, HeaderMap::new()).await {
            Ok(envelope) => envelope,
            Err(SyncError::NotFound) => return Ok(FetchOutcome::NotFound),
            Err(e) => return Err(e),
        };

        let product = match envelope.data {
            Some(product) if envelope.success => product,
            _ => {
                return Err(SyncError::InvalidData(
                    "API returned invalid data structure".to_string(),
                ))
            }
        };

        debug!(
            sku = sku,
            availability = %product.availability,
            price = product.price,
            "Best Buy response"
        );

        Ok(FetchOutcome::Found(RawSupplierData {
            available: product.availability.eq_ignore_ascii_case("instock"),
            stock: None,
            price: Some(product.price),
            freight: None,
            brand: product.brand,
            ..Default::default()
        }))
    }

    fn retry_delay(&self, attempt: u32, severity: Severity) -> Duration {
        let ms = self.suspicious_delay_ms as f64 * attempt as f64 * severity.delay_multiplier();
        Duration::from_millis(ms as u64)
    }
}

/// Judge whether a Best Buy answer looks plausible
pub fn analyze_response(raw: &RawSupplierData) -> Option<Suspicion> {
    let price = raw.price.unwrap_or(0.0);

    if !raw.available && price > 0.0 {
        return Some(Suspicion {
            reason: format!("out of stock but priced at {:.2}", price),
            severity: Severity::High,
        });
    }
    if !raw.available && price == 0.0 {
        return Some(Suspicion {
            reason: "out of stock with zero price".to_string(),
            severity: Severity::Medium,
        });
    }
    if price > 0.0 && price < 5.0 {
        return Some(Suspicion {
            reason: format!("unusually low price {:.2}", price),
            severity: Severity::Medium,
        });
    }
    if price > 10_000.0 {
        return Some(Suspicion {
            reason: format!("unusually high price {:.2}", price),
            severity: Severity::Low,
        });
    }
    None
}

/// Whether `current` should replace `previous` as the answer to keep
pub fn is_better_response(current: &RawSupplierData, previous: Option<&RawSupplierData>) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    let current_price = current.price.unwrap_or(0.0);
    let previous_price = previous.price.unwrap_or(0.0);

    (current_price > 0.0 && previous_price == 0.0) || (current.available && !previous.available)
}

#[async_trait]
impl SupplierProvider for BestBuyProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Best Buy"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::BestBuy
    }

    fn defaults(&self) -> ProviderDefaults {
        // A failed Best Buy lookup must never leave a stale in-stock listing.
        ProviderDefaults {
            skip_problematic: true,
        }
    }

    async fn fetch(&self, sku: &str) -> Result<FetchOutcome, SyncError> {
        let mut best: Option<RawSupplierData> = None;

        for attempt in 1..=self.suspicious_attempts {
            let raw = match self.fetch_once(sku).await? {
                FetchOutcome::Found(raw) => raw,
                FetchOutcome::NotFound => return Ok(FetchOutcome::NotFound),
            };

            let Some(suspicion) = analyze_response(&raw) else {
                if attempt > 1 {
                    info!(sku = sku, attempt = attempt, "Plausible response after retry");
                }
                return Ok(FetchOutcome::Found(raw));
            };

            warn!(
                sku = sku,
                attempt = attempt,
                reason = %suspicion.reason,
                "Suspicious supplier response"
            );
            if is_better_response(&raw, best.as_ref()) {
                best = Some(raw);
            }

            if attempt < self.suspicious_attempts {
                tokio::time::sleep(self.retry_delay(attempt, suspicion.severity)).await;
            }
        }

        match best {
            Some(raw) => Ok(FetchOutcome::Found(raw)),
            None => Ok(FetchOutcome::NotFound),
        }
    }

    fn derive_canonical(
        &self,
        raw: &RawSupplierData,
        config: &StoreConfig,
        today: NaiveDate,
    ) -> ProductDelta {
        derive_delta(raw, config, today)
    }

    fn phase2_queries(&self) -> Phase2Queries {
        Phase2Queries::by_primary_sku()
    }

    async fn close(&self) {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        info!(provider = %self.id, requests = requests, "Best Buy provider closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::models::Availability;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(base_url: &str) -> ProviderContext {
        let mut options = BTreeMap::new();
        options.insert("suspicious_delay_ms".to_string(), "0".to_string());
        ProviderContext {
            store_id: "bestbuy".to_string(),
            store: StoreConfig {
                base_url: Some(base_url.to_string()),
                options,
                ..Default::default()
            },
            http: HttpConfig::default(),
        }
    }

    fn answer(availability: &str, price: f64) -> serde_json::Value {
        json!({
            "success": true,
            "data": {"availability": availability, "price": price, "brand": "Sony"}
        })
    }

    fn raw(available: bool, price: f64) -> RawSupplierData {
        RawSupplierData {
            available,
            price: Some(price),
            ..Default::default()
        }
    }

    // Test 1: Plausible answer is returned after one request
    #[tokio::test]
    async fn test_fetch_in_stock() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/6505727"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("InStock", 199.99)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = BestBuyProvider::new(&context(&mock_server.uri())).unwrap();
        let outcome = provider.fetch("6505727").await.unwrap();

        let FetchOutcome::Found(raw) = outcome else {
            panic!("expected Found");
        };
        assert!(raw.available);
        assert_eq!(raw.price, Some(199.99));
        assert_eq!(raw.brand.as_deref(), Some("Sony"));
        assert_eq!(raw.stock, None);
    }

    // Test 2: 404 maps to NotFound
    #[tokio::test]
    async fn test_fetch_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let provider = BestBuyProvider::new(&context(&mock_server.uri())).unwrap();
        assert_eq!(provider.fetch("missing").await.unwrap(), FetchOutcome::NotFound);
    }

    // Test 3: Envelope without data is invalid, not retryable
    #[tokio::test]
    async fn test_fetch_invalid_structure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&mock_server)
            .await;

        let provider = BestBuyProvider::new(&context(&mock_server.uri())).unwrap();
        let err = provider.fetch("broken").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidData(_)));
    }

    // Test 4: Suspicious answers are retried and the best one is kept
    #[tokio::test]
    async fn test_suspicious_keeps_best() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("OutOfStock", 0.0)))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("OutOfStock", 49.0)))
            .mount(&mock_server)
            .await;

        let provider = BestBuyProvider::new(&context(&mock_server.uri())).unwrap();
        let FetchOutcome::Found(raw) = provider.fetch("123").await.unwrap() else {
            panic!("expected Found");
        };

        assert_eq!(raw.price, Some(49.0));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    }

    // Test 5: A plausible retry ends the loop early
    #[tokio::test]
    async fn test_suspicious_then_plausible() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("InStock", 2.0)))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("InStock", 24.0)))
            .mount(&mock_server)
            .await;

        let provider = BestBuyProvider::new(&context(&mock_server.uri())).unwrap();
        let FetchOutcome::Found(raw) = provider.fetch("456").await.unwrap() else {
            panic!("expected Found");
        };

        assert_eq!(raw.price, Some(24.0));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    // Test 6: Response analysis rules
    #[test]
    fn test_analyze_response() {
        assert_eq!(analyze_response(&raw(false, 10.0)).unwrap().severity, Severity::High);
        assert_eq!(analyze_response(&raw(false, 0.0)).unwrap().severity, Severity::Medium);
        assert_eq!(analyze_response(&raw(true, 4.99)).unwrap().severity, Severity::Medium);
        assert_eq!(analyze_response(&raw(true, 12_000.0)).unwrap().severity, Severity::Low);
        assert!(analyze_response(&raw(true, 0.0)).is_none());
        assert!(analyze_response(&raw(true, 99.0)).is_none());
    }

    // Test 7: Better-response preference
    #[test]
    fn test_is_better_response() {
        assert!(is_better_response(&raw(false, 0.0), None));
        assert!(is_better_response(&raw(false, 10.0), Some(&raw(false, 0.0))));
        assert!(is_better_response(&raw(true, 0.0), Some(&raw(false, 0.0))));
        assert!(!is_better_response(&raw(false, 0.0), Some(&raw(false, 10.0))));
    }

    // Test 8: Variant defaults force skip_problematic
    #[test]
    fn test_defaults_force_skip_problematic() {
        let provider = BestBuyProvider::new(&context("http://localhost")).unwrap();
        assert!(provider.defaults().skip_problematic);
        assert_eq!(provider.kind(), ProviderKind::BestBuy);
    }

    // Test 9: Lead time is the store default
    #[test]
    fn test_derive_uses_store_handling() {
        let provider = BestBuyProvider::new(&context("http://localhost")).unwrap();
        let delta = provider.derive_canonical(
            &raw(true, 99.0),
            &StoreConfig::default(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );

        assert_eq!(delta.availability, Availability::InStock);
        assert_eq!(delta.quantity, 20);
        assert_eq!(delta.handling_time, 1 + 3);
    }

    // Test 10: Invalid option values are rejected
    #[test]
    fn test_invalid_option() {
        let mut ctx = context("http://localhost");
        ctx.store
            .options
            .insert("suspicious_attempts".to_string(), "many".to_string());

        assert!(matches!(
            BestBuyProvider::new(&ctx),
            Err(ProviderError::InvalidConfig(_))
        ));
    }
}
