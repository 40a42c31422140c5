//! Selling Partner feeds API client
//!
//! Submitting a feed takes four calls: exchange the refresh token for an
//! access token (cached until shortly before it expires), create a feed
//! document to obtain an upload URL, PUT the body there, then create the feed
//! pointing at that document. Reports are resolved the same way in reverse
//! and may come back gzip-compressed.

use std::future::Future;
use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HttpConfig, MarketplaceConfig};
use crate::error::{FeedError, SyncError};
use crate::models::FeedReport;
use crate::sync::{HttpClient, RetryPolicy};

use super::{FeedDocument, MarketplaceClient, RemoteFeedStatus};

const FEEDS_PATH: &str = "/feeds/2021-06-30";
const DOCUMENT_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentResponse {
    feed_document_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFeedResponse {
    feed_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedStatusResponse {
    processing_status: String,
    result_feed_document_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    url: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// HTTP implementation of [`MarketplaceClient`]
pub struct SpApiClient {
    http: HttpClient,
    endpoint: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    marketplace_id: String,
    feed_type: String,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl SpApiClient {
    /// Create a client from configuration
    pub fn new(config: &MarketplaceConfig, http: &HttpConfig) -> Result<Self, FeedError> {
        Ok(Self::with_http_client(config, HttpClient::new(http)?))
    }

    /// Create a client with an existing HTTP client
    pub fn with_http_client(config: &MarketplaceConfig, http: HttpClient) -> Self {
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            marketplace_id: config.marketplace_id.clone(),
            feed_type: config.feed_type.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
            token: Mutex::new(None),
        }
    }

    /// Current access token, exchanging the refresh token when needed
    async fn access_token(&self) -> Result<String, FeedError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        if self.client_id.is_empty() || self.refresh_token.is_empty() {
            return Err(FeedError::Auth(
                "marketplace credentials are not configured".to_string(),
            ));
        }

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response: TokenResponse = self
            .retry
            .execute(|| self.http.post_form(&self.token_endpoint, &form))
            .await
            .map_err(|e| match e {
                SyncError::Unauthorized | SyncError::ClientError(_) => {
                    FeedError::Auth(format!("token exchange rejected: {}", e))
                }
                other => FeedError::Sync(other),
            })?;

        debug!(expires_in = response.expires_in, "Marketplace access token refreshed");
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(response.access_token)
    }

    async fn auth_headers(&self) -> Result<HeaderMap, FeedError> {
        let token = self.access_token().await?;
        let value = HeaderValue::from_str(&token)
            .map_err(|_| FeedError::Auth("access token is not a valid header value".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, value);
        Ok(headers)
    }

    /// Run an API call, refreshing the access token once if it is rejected
    ///
    /// A second rejection with a fresh token means the credentials themselves
    /// are no longer accepted and is reported as [`FeedError::Auth`].
    async fn with_token_refresh<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, FeedError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        match call().await {
            Err(FeedError::Sync(SyncError::Unauthorized)) => {
                warn!(operation = operation, "Marketplace rejected access token, forcing refresh");
                *self.token.lock().await = None;
            }
            result => return result,
        }

        match call().await {
            Err(FeedError::Sync(SyncError::Unauthorized)) => {
                *self.token.lock().await = None;
                Err(FeedError::Auth(format!(
                    "{} rejected after token refresh",
                    operation
                )))
            }
            result => result,
        }
    }

    async fn submit(&self, document: &FeedDocument) -> Result<String, FeedError> {
        let body = document.to_json()?;
        let headers = self.auth_headers().await?;

        let documents_url = format!("{}{}/documents", self.endpoint, FEEDS_PATH);
        let create_document = json!({ "contentType": DOCUMENT_CONTENT_TYPE });
        let upload: CreateDocumentResponse = self
            .retry
            .execute(|| {
                self.http
                    .post_json(&documents_url, headers.clone(), &create_document)
            })
            .await?;

        self.retry
            .execute(|| {
                self.http
                    .put_bytes(&upload.url, DOCUMENT_CONTENT_TYPE, body.clone())
            })
            .await?;
        debug!(
            document_id = %upload.feed_document_id,
            bytes = body.len(),
            "Feed document uploaded"
        );

        let feeds_url = format!("{}{}/feeds", self.endpoint, FEEDS_PATH);
        let create_feed = json!({
            "feedType": self.feed_type,
            "marketplaceIds": [self.marketplace_id],
            "inputFeedDocumentId": upload.feed_document_id,
        });
        let created: CreateFeedResponse = self
            .retry
            .execute(|| self.http.post_json(&feeds_url, headers.clone(), &create_feed))
            .await?;

        info!(
            feed_id = %created.feed_id,
            messages = document.len(),
            "Feed submitted"
        );
        Ok(created.feed_id)
    }

    async fn status(&self, feed_id: &str) -> Result<RemoteFeedStatus, FeedError> {
        let headers = self.auth_headers().await?;
        let url = format!("{}{}/feeds/{}", self.endpoint, FEEDS_PATH, feed_id);

        let response: FeedStatusResponse = self.http.get_json(&url, headers).await?;
        debug!(feed_id = feed_id, status = %response.processing_status, "Feed status");
        Ok(RemoteFeedStatus::from_remote(
            response.processing_status,
            response.result_feed_document_id,
        ))
    }

    async fn report(&self, document_id: &str) -> Result<FeedReport, FeedError> {
        let headers = self.auth_headers().await?;
        let url = format!("{}{}/documents/{}", self.endpoint, FEEDS_PATH, document_id);

        let document: DocumentResponse = self
            .retry
            .execute(|| self.http.get_json(&url, headers.clone()))
            .await?;
        let raw = self
            .retry
            .execute(|| self.http.get_bytes(&document.url, HeaderMap::new()))
            .await?;

        let report = parse_report(&raw)?;
        info!(
            document_id = document_id,
            accepted = report.summary.messages_accepted,
            invalid = report.summary.messages_invalid,
            "Feed report downloaded"
        );
        Ok(report)
    }
}

#[async_trait]
impl MarketplaceClient for SpApiClient {
    async fn submit_feed(&self, document: &FeedDocument) -> Result<String, FeedError> {
        self.with_token_refresh("createFeed", || self.submit(document))
            .await
    }

    async fn feed_status(&self, feed_id: &str) -> Result<RemoteFeedStatus, FeedError> {
        self.with_token_refresh("getFeed", || self.status(feed_id))
            .await
    }

    async fn fetch_report(&self, document_id: &str) -> Result<FeedReport, FeedError> {
        self.with_token_refresh("getFeedDocument", || self.report(document_id))
            .await
    }
}

/// Decode a report body, gunzipping it first when compressed
pub fn parse_report(raw: &[u8]) -> Result<FeedReport, FeedError> {
    let decoded;
    let body = if raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| FeedError::InvalidReport(format!("gzip: {}", e)))?;
        decoded = out;
        decoded.as_slice()
    } else {
        raw
    };

    serde_json::from_slice(body).map_err(|e| FeedError::InvalidReport(e.to_string()))
}
