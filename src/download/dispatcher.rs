//! Concurrent execution of queued downloads.
//!
//! The [`Dispatcher`] drains a batch of [`DownloadTask`]s through a
//! [`BatchRunner`], so at most `concurrency` transfers are open at once.
//! Each task runs an explicit bounded retry loop; a task's permit is held
//! across its retries.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cms_scraper_core::download::{build_http_client, Dispatcher, HttpTransport};
//! use cms_scraper_core::DownloadTask;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = build_http_client(Duration::from_secs(30), Duration::from_secs(300))?;
//! let dispatcher = Dispatcher::new(Arc::new(HttpTransport::new(client)), 10)?;
//! let task = DownloadTask::new("https://cms.example.edu/f.pdf", "./mirror", "f.pdf", None);
//! let summary = dispatcher.run_batch(vec![task]).await;
//! println!("completed {}, failed {}", summary.completed, summary.failed);
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::constants::WRITE_BUFFER_CAPACITY;
use super::filename::file_name_from_disposition;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
use super::transport::{BodyStream, Transport};
use super::DownloadError;
use crate::batch::{BatchError, BatchItemError, BatchRunner};
use crate::naming::humanize_size;
use crate::queue::DEFAULT_MAX_DOWNLOAD_SIZE;
use crate::task::{DownloadTask, HtmlPage, destination_for};

/// Default number of simultaneous transfers.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Why a task finished without writing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A file of the response's length already exists.
    AlreadyPresent,
    /// The response is at or above the size ceiling.
    TooLarge,
}

/// Successful end state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The file was written.
    Completed {
        /// Final path of the file.
        path: PathBuf,
        /// Number of bytes written.
        bytes: u64,
    },
    /// Nothing needed to be written.
    Skipped(SkipReason),
}

/// Counters for one dispatched batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files written.
    pub completed: usize,
    /// Tasks that turned out to need no transfer.
    pub skipped: usize,
    /// Tasks that gave up.
    pub failed: usize,
    /// Retry attempts made across all tasks.
    pub retried: usize,
    /// Bytes written.
    pub bytes: u64,
}

impl BatchSummary {
    /// Number of tasks accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// Runs download batches with bounded concurrency and retries.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    runner: BatchRunner,
    retry_policy: RetryPolicy,
    max_download_size: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("concurrency", &self.runner.concurrency())
            .field("retry_policy", &self.retry_policy)
            .field("max_download_size", &self.max_download_size)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the default retry policy and size ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `concurrency` is outside 1-100.
    pub fn new(transport: Arc<dyn Transport>, concurrency: usize) -> Result<Self, BatchError> {
        let runner = BatchRunner::new(concurrency)?;
        debug!(concurrency, "creating dispatcher");
        Ok(Self {
            transport,
            runner,
            retry_policy: RetryPolicy::default(),
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the size ceiling applied to response lengths.
    #[must_use]
    pub fn with_max_download_size(mut self, max_download_size: u64) -> Self {
        self.max_download_size = max_download_size;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.runner.concurrency()
    }

    /// Downloads every task. Individual failures are counted, never returned.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run_batch(&self, tasks: Vec<DownloadTask>) -> BatchSummary {
        let retried = Arc::new(AtomicUsize::new(0));
        let transport = Arc::clone(&self.transport);
        let policy = self.retry_policy.clone();
        let max_download_size = self.max_download_size;
        let counter = Arc::clone(&retried);

        info!("starting downloads");

        let results = self
            .runner
            .run(tasks, move |task| {
                let transport = Arc::clone(&transport);
                let policy = policy.clone();
                let counter = Arc::clone(&counter);
                async move {
                    let result = download_with_retry(
                        transport.as_ref(),
                        &task,
                        &policy,
                        max_download_size,
                        &counter,
                    )
                    .await;
                    Ok::<_, Infallible>(result)
                }
            })
            .await;

        let mut summary = BatchSummary {
            retried: retried.load(Ordering::SeqCst),
            ..BatchSummary::default()
        };
        for result in results {
            match result {
                Ok(Ok(TaskOutcome::Completed { bytes, .. })) => {
                    summary.completed += 1;
                    summary.bytes += bytes;
                }
                Ok(Ok(TaskOutcome::Skipped(_))) => summary.skipped += 1,
                Ok(Err(_)) | Err(BatchItemError::Aborted(_)) => summary.failed += 1,
                Err(BatchItemError::Worker(never)) => match never {},
            }
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            retried = summary.retried,
            size = %humanize_size(summary.bytes),
            "downloads complete"
        );
        summary
    }

    /// Writes HTML snapshots with the same concurrency bound.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub async fn write_pages(&self, pages: Vec<HtmlPage>) -> BatchSummary {
        let results = self
            .runner
            .run(pages, |page| async move {
                let path = page.destination();
                tokio::fs::write(&path, page.html.as_bytes())
                    .await
                    .map(|()| page.size())
                    .map_err(|e| DownloadError::io(path, e))
            })
            .await;

        let mut summary = BatchSummary::default();
        for result in results {
            match result {
                Ok(bytes) => {
                    summary.completed += 1;
                    summary.bytes += bytes;
                }
                Err(error) => {
                    warn!(error = %error, "failed to write page");
                    summary.failed += 1;
                }
            }
        }
        debug!(written = summary.completed, failed = summary.failed, "pages written");
        summary
    }
}

/// Extracts the server-requested delay from a rate-limited error.
fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    match error {
        DownloadError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Runs one task to completion, retrying transient failures.
#[instrument(skip_all, fields(url = %task.url))]
async fn download_with_retry(
    transport: &dyn Transport,
    task: &DownloadTask,
    policy: &RetryPolicy,
    max_download_size: u64,
    retried: &AtomicUsize,
) -> Result<TaskOutcome, DownloadError> {
    let mut attempt = 1u32;

    loop {
        match download_once(transport, task, max_download_size).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => {
                let failure_type = classify_error(&error);
                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff,
                        attempt: next,
                    } => {
                        let delay = if failure_type == FailureType::RateLimited {
                            retry_after_delay(&error).unwrap_or(backoff)
                        } else {
                            backoff
                        };
                        warn!(
                            error = %error,
                            attempt = next,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying download"
                        );
                        retried.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(error = %error, attempts = attempt, reason, "giving up on download");
                        return Err(error);
                    }
                }
            }
        }
    }
}

async fn download_once(
    transport: &dyn Transport,
    task: &DownloadTask,
    max_download_size: u64,
) -> Result<TaskOutcome, DownloadError> {
    let response = transport.get(&task.url).await?;

    let path = match task.destination() {
        Some(path) => path,
        None => {
            let name = response
                .content_disposition
                .as_deref()
                .and_then(file_name_from_disposition)
                .ok_or_else(|| DownloadError::missing_file_name(&task.url))?;
            destination_for(&task.dest_dir, &name, &task.file_ext)
        }
    };

    if let Some(size) = response.content_length.or(task.declared_size) {
        if size >= max_download_size {
            info!(
                path = %path.display(),
                size = %humanize_size(size),
                "skipping file: exceeds size limit"
            );
            return Ok(TaskOutcome::Skipped(SkipReason::TooLarge));
        }
        if exists_with_size(&path, size).await {
            debug!(path = %path.display(), "file already present");
            return Ok(TaskOutcome::Skipped(SkipReason::AlreadyPresent));
        }
    }

    info!(path = %path.display(), "downloading");
    let bytes = stream_to_file(response.body, &path).await?;
    debug!(path = %path.display(), bytes, "download complete");
    Ok(TaskOutcome::Completed { path, bytes })
}

async fn exists_with_size(path: &Path, size: u64) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() == size)
}

/// Streams `body` into `path`, removing the partial file on error.
async fn stream_to_file(mut body: BodyStream, path: &Path) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    let result = write_body(file, &mut body, path).await;
    if result.is_err() {
        debug!(path = %path.display(), "removing partial file");
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

async fn write_body(file: File, body: &mut BodyStream, path: &Path) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file);
    let mut bytes_written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(bytes_written)
}
