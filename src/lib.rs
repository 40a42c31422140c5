//! feed-sync - Two-phase supplier-to-marketplace inventory feed synchronization
//!
//! Phase 1 refreshes every product of a store from its supplier, a recheck
//! pass retries the previous failures, and phase 2 publishes the changed rows
//! to the marketplace as batched feed documents.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod failure_log;
pub mod marketplace;
pub mod models;
pub mod providers;
pub mod sync;
pub mod telemetry;
