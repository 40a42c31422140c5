//! Application error types for feed-sync
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;

use thiserror::Error;

/// Provider registry errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// No constructor registered for the requested id
    #[error("Provider not found: {0}")]
    NotFound(String),

    /// Provider construction failed
    #[error("Provider initialization failed: {0}")]
    InitializationFailed(String),

    /// Provider configuration invalid
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Transport and remote API errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream, with the server-provided wait if any
    #[error("Rate limited by upstream")]
    RateLimited(Option<u64>),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Client error other than 429
    #[error("Client error: HTTP {0}")]
    ClientError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Unauthorized
    #[error("Unauthorized")]
    Unauthorized,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Marketplace feed errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    /// Remote call failed
    #[error("Marketplace request failed: {0}")]
    Sync(#[from] SyncError),

    /// Report could not be decoded
    #[error("Invalid feed report: {0}")]
    InvalidReport(String),

    /// Feed document could not be encoded
    #[error("Feed serialization error: {0}")]
    Serialization(String),

    /// Status transition out of a terminal state
    #[error("Feed submission {id} is already terminal ({status})")]
    TerminalState {
        /// Submission id
        id: String,
        /// Terminal status it is stuck in
        status: String,
    },

    /// Credentials missing or rejected
    #[error("Marketplace authentication failed: {0}")]
    Auth(String),
}

/// Failure snapshot storage errors
#[derive(Debug, Error)]
pub enum FailureLogError {
    /// IO error
    #[error("Failure log IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("Failure log CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Task queue errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// Task was dropped before it started because the run was cancelled
    #[error("Task cancelled before start")]
    Cancelled,

    /// Task panicked while running
    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Phase-level errors that abort a phase or a run
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Provider could not be resolved
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Database error outside of a single SKU write
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Marketplace unreachable
    #[error("Marketplace error: {0}")]
    Marketplace(#[from] FeedError),

    /// Failure snapshot could not be written or read
    #[error("Failure log error: {0}")]
    FailureLog(#[from] FailureLogError),

    /// Every attempted write failed
    #[error("Aborted after {failures} consecutive persistence failures")]
    PersistenceAborted {
        /// Number of failed writes before the abort
        failures: usize,
    },

    /// Store has no configuration
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// A run for the store is already active
    #[error("Sync already running for store {0}")]
    AlreadyRunning(String),

    /// Scheduled run exceeded its wall-clock budget
    #[error("Sync timed out after {0}s")]
    TimedOut(u64),

    /// Manual trigger sent to a scheduler that is not running
    #[error("Scheduler not running")]
    SchedulerStopped,
}

/// Application-level error type
///
/// This is the main error type used throughout the application.
/// It aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Provider error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Feed error
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Phase error
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Server-mandated wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServerError(code) if *code >= 500 => true,
            SyncError::Network(_) => true,

            SyncError::ServerError(_) => false,
            SyncError::ClientError(_) => false,
            SyncError::InvalidData(_) => false,
            SyncError::NotFound => false,
            SyncError::Unauthorized => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited(Some(secs)) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl RetryableError for FeedError {
    fn is_retryable(&self) -> bool {
        match self {
            FeedError::Sync(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FeedError::Sync(err) => err.retry_after(),
            _ => None,
        }
    }
}
