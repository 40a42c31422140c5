//! Request pipeline and scheduling infrastructure
//!
//! # Components
//!
//! - [`rate_limiter`]: rolling-window pacing plus a concurrency cap
//! - [`task_queue`]: FIFO work queue started through a rate limiter
//! - [`retry`]: retry policy with exponential backoff and full jitter
//! - [`http_client`]: shared HTTP client mapping failures to [`SyncError`](crate::error::SyncError)
//! - [`scheduler`]: periodic store runs with jitter and manual triggers
//!
//! # Example
//!
//! ```ignore
//! use feed_sync::sync::{RateLimiter, RetryPolicy, TaskQueue};
//!
//! let queue = TaskQueue::new(Arc::new(RateLimiter::new(5, 5)), cancel.clone());
//! let retry = RetryPolicy::new(RetryConfig::default());
//!
//! let handle = queue.schedule(async move {
//!     retry.execute(|| client.get_json::<Value>(&url, HeaderMap::new())).await
//! });
//! let result = handle.await?;
//! ```

pub mod http_client;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod task_queue;

// Re-export main types for convenience
pub use http_client::HttpClient;
pub use rate_limiter::{RateLimitPermit, RateLimiter};
pub use retry::RetryPolicy;
pub use scheduler::{ManualSyncHandle, SyncScheduler, SyncStatus, Syncable};
pub use task_queue::{TaskHandle, TaskQueue};
