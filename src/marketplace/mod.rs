//! Marketplace feed API
//!
//! - [`feed`]: feed document built from a batch of dirty products
//! - [`archive`]: optional on-disk copy of every submitted document
//! - [`sp_api`]: HTTP client for the Selling Partner feeds API

pub mod archive;
pub mod feed;
pub mod sp_api;

use async_trait::async_trait;

use crate::error::FeedError;
use crate::models::{FeedReport, FeedStatus};

pub use archive::FeedArchive;
pub use feed::{content_digest, FeedDocument, FeedOptions};
pub use sp_api::SpApiClient;

/// Remote view of a submitted feed
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFeedStatus {
    /// Local status the remote one maps to
    pub status: FeedStatus,
    /// Status string as reported
    pub raw_status: String,
    /// Report document, once processing is done
    pub result_document_id: Option<String>,
}

impl RemoteFeedStatus {
    /// Map a remote `processingStatus`
    pub fn from_remote(raw_status: impl Into<String>, result_document_id: Option<String>) -> Self {
        let raw_status = raw_status.into();
        Self {
            status: FeedStatus::from_remote(&raw_status),
            raw_status,
            result_document_id,
        }
    }
}

/// Capabilities phase 2 needs from the marketplace
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Upload a document and start processing it; returns the remote feed id
    async fn submit_feed(&self, document: &FeedDocument) -> Result<String, FeedError>;

    /// Current processing status of a feed
    async fn feed_status(&self, feed_id: &str) -> Result<RemoteFeedStatus, FeedError>;

    /// Download and parse a processing report
    async fn fetch_report(&self, document_id: &str) -> Result<FeedReport, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Remote statuses map onto the local lifecycle
    #[test]
    fn test_remote_status() {
        let status = RemoteFeedStatus::from_remote("DONE", Some("doc-1".to_string()));
        assert_eq!(status.status, FeedStatus::Done);
        assert_eq!(status.raw_status, "DONE");

        let status = RemoteFeedStatus::from_remote("IN_QUEUE", None);
        assert_eq!(status.status, FeedStatus::Submitted);
        assert!(!status.status.is_terminal());
    }

    // Test 2: Mock client can be driven through a submission
    #[tokio::test]
    async fn test_mock_marketplace_client() {
        let mut mock = MockMarketplaceClient::new();
        mock.expect_submit_feed().returning(|_| Ok("F1".to_string()));
        mock.expect_feed_status()
            .withf(|id| id == "F1")
            .returning(|_| Ok(RemoteFeedStatus::from_remote("FATAL", None)));

        let doc = FeedDocument::build(
            &[],
            &FeedOptions {
                seller_id: "S".to_string(),
                fulfillment_channel: "DEFAULT".to_string(),
                publish_price: false,
                currency: "USD".to_string(),
            },
        );

        let id = mock.submit_feed(&doc).await.unwrap();
        let status = mock.feed_status(&id).await.unwrap();
        assert_eq!(status.status, FeedStatus::Fatal);
    }
}
