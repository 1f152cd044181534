//! Bounded-concurrency batch execution.
//!
//! [`BatchRunner`] is the one worker-pool primitive of the crate: course
//! discovery, file downloads, HTML page writes and membership changes are all
//! specializations of it.
//!
//! # Concurrency Model
//!
//! - Each item runs in its own Tokio task
//! - A semaphore permit is acquired before the task is spawned
//! - Permits are released when the task finishes (RAII)
//! - A failing or panicking worker only affects its own item
//! - Dropping the `run` future aborts every worker still running
//!
//! # Example
//!
//! ```
//! use cms_scraper_core::batch::BatchRunner;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = BatchRunner::new(4)?;
//! let results = runner
//!     .run(1..=10u32, |n| async move {
//!         if n % 5 == 0 { Err(format!("{n} refused")) } else { Ok(n * 2) }
//!     })
//!     .await;
//! assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 8);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Error creating a batch runner.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Why a single batch item did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum BatchItemError<E> {
    /// The worker returned an error.
    #[error("{0}")]
    Worker(E),

    /// The worker task panicked or was cancelled.
    #[error("worker task aborted: {0}")]
    Aborted(String),
}

impl<E> BatchItemError<E> {
    /// Returns the worker error, if the worker ran to completion.
    pub fn into_worker(self) -> Option<E> {
        match self {
            Self::Worker(error) => Some(error),
            Self::Aborted(_) => None,
        }
    }
}

/// Spawned workers of one batch, aborted if the batch is abandoned.
struct Workers<T>(Vec<JoinHandle<T>>);

impl<T> Drop for Workers<T> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Per-item results of [`BatchRunner::run`], in input order.
pub type BatchResults<T, E> = Vec<Result<T, BatchItemError<E>>>;

/// Runs a worker over many items with at most `concurrency` in flight.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl BatchRunner {
    /// Creates a runner allowing `concurrency` simultaneous workers.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    pub fn new(concurrency: usize) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Executes `worker(item)` for every item.
    ///
    /// At most `concurrency` invocations run at any instant. Results are
    /// returned in the order items were supplied; an error or panic in one
    /// worker is recorded for that item and never cancels the others.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run<I, F, Fut, T, E>(&self, items: I, worker: F) -> BatchResults<T, E>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let worker = Arc::new(worker);
        let mut handles = Workers(Vec::new());

        for item in items {
            // The runner owns the semaphore and never closes it.
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&worker);
            handles.0.push(tokio::spawn(async move {
                let _permit = permit;
                worker(item).await
            }));
        }

        debug!(task_count = handles.0.len(), "waiting for batch to complete");

        let mut results = Vec::with_capacity(handles.0.len());
        for handle in &mut handles.0 {
            match handle.await {
                Ok(Ok(value)) => results.push(Ok(value)),
                Ok(Err(error)) => results.push(Err(BatchItemError::Worker(error))),
                Err(join_error) => {
                    warn!(error = %join_error, "batch worker panicked");
                    results.push(Err(BatchItemError::Aborted(join_error.to_string())));
                }
            }
        }
        results
    }
}
