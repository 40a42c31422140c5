//! Failed-fetch records collected during a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One SKU that could not be refreshed from its supplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Product SKU
    pub sku: String,

    /// Free-text failure cause
    pub reason: String,

    /// When the failure was observed
    pub timestamp: DateTime<Utc>,

    /// Supplier-specific diagnostic columns, in insertion order
    pub extras: Vec<(String, String)>,
}

impl FailureRecord {
    /// Create a new failure record stamped with the current time
    pub fn new(sku: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
            extras: Vec::new(),
        }
    }

    /// Attach a diagnostic column
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.push((key.into(), value.into()));
        self
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Look up a diagnostic column
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Append-only failure buffer owned by one run
#[derive(Debug, Default)]
pub struct FailureAccumulator {
    records: Vec<FailureRecord>,
}

impl FailureAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recorded failures so far
    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    /// Consume the accumulator
    pub fn into_records(self) -> Vec<FailureRecord> {
        self.records
    }
}
