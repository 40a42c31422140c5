//! Shared HTTP client for supplier and marketplace APIs
//!
//! Wraps a `reqwest::Client` with a per-request timeout and maps transport
//! failures and HTTP statuses onto [`SyncError`] so callers can hand them to a
//! [`RetryPolicy`](crate::sync::RetryPolicy) unchanged. Pacing is not done
//! here; callers go through a [`RateLimiter`](crate::sync::RateLimiter).

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::SyncError;

/// HTTP client with error-taxonomy mapping
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client from configuration
    pub fn new(config: &HttpConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET a URL and return the raw body
    pub async fn get_bytes(&self, url: &str, headers: HeaderMap) -> Result<Bytes, SyncError> {
        let response = self.send(self.client.get(url).headers(headers), url).await?;
        read_body(response).await
    }

    /// GET a URL and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<T, SyncError> {
        let body = self.get_bytes(url, headers).await?;
        decode_json(&body)
    }

    /// POST a JSON body and decode a JSON response
    pub async fn post_json<B, T>(&self, url: &str, headers: HeaderMap, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(url).headers(headers).json(body);
        let response = self.send(request, url).await?;
        decode_json(&read_body(response).await?)
    }

    /// POST a url-encoded form and decode a JSON response
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T, SyncError> {
        let response = self.send(self.client.post(url).form(form), url).await?;
        decode_json(&read_body(response).await?)
    }

    /// PUT a raw body with the given content type
    pub async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), SyncError> {
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| SyncError::InvalidData(format!("Invalid content type: {}", e)))?;
        let request = self.client.put(url).header(CONTENT_TYPE, content_type).body(body);
        self.send(request, url).await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, SyncError> {
        debug!(url = url, "Sending HTTP request");

        let response = request.send().await.map_err(map_transport_error)?;
        check_status(response, url)
    }
}

fn map_transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::NetworkTimeout
    } else if e.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(e.to_string())
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let wait = retry_after_secs(response.headers());
            warn!(url = url, retry_after = ?wait, "Rate limited by upstream");
            Err(SyncError::RateLimited(wait))
        }
        StatusCode::NOT_FOUND => {
            debug!(url = url, "Resource not found (404)");
            Err(SyncError::NotFound)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(url = url, status = status.as_u16(), "Unauthorized");
            Err(SyncError::Unauthorized)
        }
        status if status.is_server_error() => {
            warn!(url = url, status = status.as_u16(), "Server error");
            Err(SyncError::ServerError(status.as_u16()))
        }
        status => {
            warn!(url = url, status = status.as_u16(), "Unexpected status");
            Err(SyncError::ClientError(status.as_u16()))
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn read_body(response: Response) -> Result<Bytes, SyncError> {
    response
        .bytes()
        .await
        .map_err(|e| SyncError::Network(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, SyncError> {
    serde_json::from_slice(body).map_err(|e| SyncError::InvalidData(e.to_string()))
}
