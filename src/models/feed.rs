//! Marketplace feed submission models
//!
//! A submission walks `submitted -> processing -> done | fatal` and never
//! leaves a terminal state. The processing report decides which SKUs of a
//! batch were accepted.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Lifecycle state of a submitted feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    /// Accepted by the marketplace, not yet picked up
    Submitted,
    /// Being processed remotely
    Processing,
    /// Finished; a report is available
    Done,
    /// Failed, cancelled remotely, or timed out locally
    Fatal,
}

impl FeedStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, FeedStatus::Done | FeedStatus::Fatal)
    }

    /// Map a remote `processingStatus` value
    pub fn from_remote(status: &str) -> Self {
        match status.to_uppercase().as_str() {
            "DONE" => FeedStatus::Done,
            "FATAL" | "CANCELLED" => FeedStatus::Fatal,
            "IN_PROGRESS" => FeedStatus::Processing,
            _ => FeedStatus::Submitted,
        }
    }
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedStatus::Submitted => write!(f, "submitted"),
            FeedStatus::Processing => write!(f, "processing"),
            FeedStatus::Done => write!(f, "done"),
            FeedStatus::Fatal => write!(f, "fatal"),
        }
    }
}

impl std::str::FromStr for FeedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "submitted" => Ok(FeedStatus::Submitted),
            "processing" => Ok(FeedStatus::Processing),
            "done" => Ok(FeedStatus::Done),
            "fatal" => Ok(FeedStatus::Fatal),
            _ => Err(format!("Invalid feed status: {}", s)),
        }
    }
}

/// Local record of one submitted feed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSubmission {
    /// Remote feed id
    pub id: String,
    /// Owning store id
    pub store_id: String,
    /// Remote feed type
    pub feed_type: String,
    /// Current status
    pub status: FeedStatus,
    /// Zero-based batch position within the phase
    pub batch_index: usize,
    /// SHA-256 hex digest of the submitted document
    pub content_digest: String,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Raw report once terminal
    pub report_json: Option<String>,
}

impl FeedSubmission {
    /// Record a freshly submitted feed
    pub fn submitted(
        id: impl Into<String>,
        store_id: impl Into<String>,
        feed_type: impl Into<String>,
        batch_index: usize,
        content_digest: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            store_id: store_id.into(),
            feed_type: feed_type.into(),
            status: FeedStatus::Submitted,
            batch_index,
            content_digest: content_digest.into(),
            created_at: Utc::now(),
            report_json: None,
        }
    }

    /// Move to `next`; a terminal submission rejects every transition
    pub fn transition(&mut self, next: FeedStatus) -> Result<(), FeedError> {
        if self.status.is_terminal() {
            return Err(FeedError::TerminalState {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if next == FeedStatus::Submitted {
            return Ok(());
        }
        self.status = next;
        Ok(())
    }
}

/// Report header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportHeader {
    /// Processing status
    #[serde(default)]
    pub status: Option<String>,
    /// Remote feed id
    #[serde(default)]
    pub feed_id: Option<String>,
}

/// Report counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Messages read
    #[serde(default)]
    pub messages_processed: u64,
    /// Messages applied
    #[serde(default)]
    pub messages_accepted: u64,
    /// Messages rejected
    #[serde(default)]
    pub messages_invalid: u64,
    /// Error-level issue count
    #[serde(default)]
    pub errors: u64,
    /// Warning-level issue count
    #[serde(default)]
    pub warnings: u64,
}

/// One issue raised against the feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIssue {
    /// Message the issue refers to
    #[serde(default)]
    pub message_id: Option<u64>,
    /// SKU the issue refers to
    #[serde(default)]
    pub sku: Option<String>,
    /// Issue code
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// `ERROR`, `WARNING`, or `INFO`
    #[serde(default)]
    pub severity: Option<String>,
}

impl ReportIssue {
    /// Issues without a severity are treated as errors
    pub fn is_error(&self) -> bool {
        self.severity
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("error"))
            .unwrap_or(true)
    }
}

/// Parsed feed processing report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedReport {
    /// Header
    #[serde(default)]
    pub header: ReportHeader,
    /// Counters
    #[serde(default)]
    pub summary: ReportSummary,
    /// Per-item issues
    #[serde(default)]
    pub issues: Vec<ReportIssue>,
}

impl FeedReport {
    /// SKUs of a batch that the report accepts
    ///
    /// `messages` pairs each 1-based message id with its SKU. A message is
    /// accepted when no error names it and the summary counts back that up.
    /// Nothing is accepted when the report holds rejections it does not
    /// attribute: an error naming neither a SKU nor a message, more invalid
    /// messages than attributed rejections, or fewer accepted messages than
    /// the batch would otherwise clear.
    pub fn accepted_skus(&self, messages: &[(u64, String)]) -> Vec<String> {
        let mut rejected_ids = HashSet::new();
        let mut rejected_skus = HashSet::new();
        let mut unattributed = false;

        for issue in self.issues.iter().filter(|i| i.is_error()) {
            match (&issue.sku, issue.message_id) {
                (Some(sku), _) => {
                    rejected_skus.insert(sku.as_str());
                }
                (None, Some(id)) => {
                    rejected_ids.insert(id);
                }
                (None, None) => unattributed = true,
            }
        }

        if unattributed && self.summary.messages_invalid > 0 {
            return Vec::new();
        }

        let (rejected, accepted): (Vec<_>, Vec<_>) = messages
            .iter()
            .partition(|(id, sku)| rejected_ids.contains(id) || rejected_skus.contains(sku.as_str()));

        if self.summary.messages_invalid > rejected.len() as u64
            || accepted.len() as u64 > self.summary.messages_accepted
        {
            return Vec::new();
        }

        accepted.into_iter().map(|(_, sku)| sku.clone()).collect()
    }
}
