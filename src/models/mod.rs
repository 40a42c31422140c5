//! Domain models for feed-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod failure;
pub mod feed;
pub mod product;
pub mod progress;

// Re-export commonly used types
pub use failure::{FailureAccumulator, FailureRecord};
pub use feed::{FeedReport, FeedStatus, FeedSubmission, ReportIssue, ReportSummary};
pub use product::{Availability, ProductDelta, ProductRecord};
pub use progress::{PhaseOutcome, RecheckOutcome, RunSummary, SyncPhase, SyncProgress};
