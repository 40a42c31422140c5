//! Token pacing for one target API
//!
//! A [`RateLimiter`] hands out permits so that at most `requests_per_second`
//! permits are granted in any rolling one-second window and at most
//! `max_concurrent` permits are alive at once. Waiters are served in arrival
//! order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

use crate::error::TaskError;

const WINDOW: Duration = Duration::from_secs(1);

/// Rolling-window rate limiter with a concurrency cap
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: usize,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    starts: Mutex<VecDeque<Instant>>,
}

/// Proof of admission; dropping it frees a concurrency slot
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Create a limiter; zero values are raised to one
    pub fn new(requests_per_second: u32, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            requests_per_second: (requests_per_second as usize).max(1),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait for a concurrency slot and a free spot in the rolling window
    ///
    /// Fails only after [`RateLimiter::close`].
    pub async fn acquire(&self) -> Result<RateLimitPermit, TaskError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TaskError::Cancelled)?;

        let mut starts = self.starts.lock().await;
        loop {
            let now = Instant::now();
            while let Some(front) = starts.front() {
                if now.duration_since(*front) >= WINDOW {
                    starts.pop_front();
                } else {
                    break;
                }
            }

            if starts.len() < self.requests_per_second {
                starts.push_back(now);
                return Ok(RateLimitPermit { _permit: permit });
            }

            // Holding the lock while sleeping keeps later callers queued behind us.
            if let Some(front) = starts.front().copied() {
                let wait = (front + WINDOW).saturating_duration_since(now);
                trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit window");
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Reject current and future waiters
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Configured starts per second
    pub fn requests_per_second(&self) -> usize {
        self.requests_per_second
    }

    /// Configured concurrency cap
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of free concurrency slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
