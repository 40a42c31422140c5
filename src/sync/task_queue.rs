//! Bounded-concurrency FIFO work queue
//!
//! Units of work are started in the order they were scheduled, each one only
//! after the shared [`RateLimiter`] admits it. Every unit runs on its own tokio
//! task so a failing or panicking unit only resolves its own [`TaskHandle`].
//! Once the queue's [`CancellationToken`] fires, units that have not started
//! yet resolve with [`TaskError::Cancelled`] and never run.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::sync::rate_limiter::{RateLimitPermit, RateLimiter};

/// A queued unit; called with a permit to run it, or `None` to drop it
type Job = Box<dyn FnOnce(Option<RateLimitPermit>) + Send>;

/// Future resolving to the result of one scheduled unit
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

/// Rate-limited queue that starts work in FIFO order
pub struct TaskQueue {
    jobs: mpsc::UnboundedSender<Job>,
    pending: Arc<watch::Sender<usize>>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl TaskQueue {
    /// Create a queue paced by `limiter` and stopped by `cancel`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(limiter: Arc<RateLimiter>, cancel: CancellationToken) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);

        tokio::spawn(dispatch(rx, Arc::clone(&limiter), cancel.clone()));

        Self {
            jobs,
            pending: Arc::new(pending),
            limiter,
            cancel,
        }
    }

    /// Enqueue a unit of work
    ///
    /// The returned handle resolves with the unit's output, with
    /// [`TaskError::Panicked`] if it panicked, or with [`TaskError::Cancelled`]
    /// if the queue was cancelled before the unit started.
    pub fn schedule<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        pending.send_modify(|n| *n += 1);

        let job: Job = Box::new(move |permit| {
            let Some(permit) = permit else {
                let _ = tx.send(Err(TaskError::Cancelled));
                pending.send_modify(|n| *n -= 1);
                return;
            };

            tokio::spawn(async move {
                let result = match tokio::spawn(task).await {
                    Ok(output) => Ok(output),
                    Err(err) if err.is_panic() => {
                        let message = panic_message(err.into_panic());
                        warn!(error = %message, "Queued task panicked");
                        Err(TaskError::Panicked(message))
                    }
                    Err(_) => Err(TaskError::Cancelled),
                };
                drop(permit);
                let _ = tx.send(result);
                pending.send_modify(|n| *n -= 1);
            });
        });

        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            job(None);
        }

        TaskHandle { rx }
    }

    /// Resolve once nothing is queued or running
    pub async fn on_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Units queued or running
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Stop starting new units
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the queue has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Limiter pacing this queue
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Job>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
) {
    while let Some(job) = rx.recv().await {
        if cancel.is_cancelled() {
            trace!("Queue cancelled, dropping task");
            job(None);
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = limiter.acquire() => permit.ok(),
        };

        // Cancellation may fire while the permit was being granted.
        if cancel.is_cancelled() {
            job(None);
        } else {
            job(permit);
        }
    }
    debug!("Task queue dispatcher stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
