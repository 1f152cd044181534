//! Streaming file transfers with bounded concurrency and retries.
//!
//! # Features
//!
//! - Streaming bodies to disk through a bounded write buffer
//! - File names from `Content-Disposition` when the task has none
//! - Skip-if-present and size-ceiling checks against the response length
//! - Exponential backoff with jitter; `Retry-After` honoured on 429
//! - Partial files removed when a stream fails

mod constants;
mod dispatcher;
mod error;
mod filename;
mod retry;
mod transport;

pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use dispatcher::{BatchSummary, DEFAULT_CONCURRENCY, Dispatcher, SkipReason, TaskOutcome};
pub use error::DownloadError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, MAX_RETRIES_LIMIT, RetryDecision, RetryPolicy,
    classify_error, parse_retry_after,
};
pub use transport::{BodyStream, HttpTransport, Transport, TransportResponse, build_http_client};
