//! Vitacost supplier provider
//!
//! The Vitacost scraper service answers `GET {base_url}/products/{sku}` with
//! a flat JSON object carrying a stock count, an availability flag, price,
//! freight and an optional delivery window. Marketplace listings for this
//! supplier use a prefixed secondary SKU, so phase 2 scopes by that column.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{ProviderError, SyncError};
use crate::models::ProductDelta;
use crate::sync::HttpClient;

use super::{
    derive_delta, FetchOutcome, Phase2Queries, ProviderContext, ProviderDefaults, ProviderKind,
    RawSupplierData, SupplierProvider,
};

/// Base URL used when the store does not configure one
pub const DEFAULT_VITACOST_BASE_URL: &str = "http://localhost:3005/vc/api";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VitacostProduct {
    #[serde(default)]
    available: bool,
    stock: Option<i64>,
    price: Option<f64>,
    freight: Option<f64>,
    brand: Option<String>,
    min_delivery_date: Option<NaiveDate>,
    max_delivery_date: Option<NaiveDate>,
    lead_time: Option<String>,
}

impl From<VitacostProduct> for RawSupplierData {
    fn from(p: VitacostProduct) -> Self {
        Self {
            available: p.available,
            stock: p.stock,
            price: p.price,
            freight: p.freight,
            brand: p.brand,
            min_delivery: p.min_delivery_date,
            max_delivery: p.max_delivery_date,
            lead_time_label: p.lead_time,
        }
    }
}

/// Vitacost provider
pub struct VitacostProvider {
    id: String,
    base_url: String,
    http_client: HttpClient,
    requests: AtomicU64,
    not_found: AtomicU64,
}

impl VitacostProvider {
    /// Create a provider for the given store
    pub fn new(ctx: &ProviderContext) -> Result<Self, ProviderError> {
        let http_client = HttpClient::new(&ctx.http)
            .map_err(|e| ProviderError::InitializationFailed(e.to_string()))?;
        Ok(Self::with_http_client(ctx, http_client))
    }

    /// Create a provider with an existing HTTP client
    pub fn with_http_client(ctx: &ProviderContext, http_client: HttpClient) -> Self {
        Self {
            id: ctx.store_id.clone(),
            base_url: ctx
                .store
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_VITACOST_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_client,
            requests: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SupplierProvider for VitacostProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Vitacost"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Vitacost
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults::default()
    }

    async fn fetch(&self, sku: &str) -> Result<FetchOutcome, SyncError> {
        let url = format!("{}/products/{}", self.base_url, sku);
        self.requests.fetch_add(1, Ordering::Relaxed);

        match self
            .http_client
            .get_json::<VitacostProduct>(&url, HeaderMap::new())
            .await
        {
            Ok(product) => {
                debug!(
                    sku = sku,
                    available = product.available,
                    stock = ?product.stock,
                    "Vitacost response"
                );
                Ok(FetchOutcome::Found(product.into()))
            }
            Err(SyncError::NotFound) => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
                Ok(FetchOutcome::NotFound)
            }
            Err(e) => Err(e),
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
        Phase2Queries::by_marketplace_sku()
    }

    async fn close(&self) {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let not_found = self.not_found.swap(0, Ordering::Relaxed);
        info!(
            provider = %self.id,
            requests = requests,
            not_found = not_found,
            "Vitacost provider closed"
        );
    }
}
