//! Course mirror core library
//!
//! This library walks a Moodle course hierarchy (course, section, module,
//! forum discussion, attachment), mirrors it onto the local filesystem and
//! downloads files with bounded concurrency. Files that are already present
//! with the expected size are never fetched again, so repeated runs only
//! transfer what changed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Moodle web-service client and the [`ContentSource`] seam
//! - [`walker`] - Turns courses into download tasks and directories
//! - [`queue`] - Deduplicating, size-limited task queue
//! - [`download`] - Dispatcher with streaming transfers and retries
//! - [`batch`] - Bounded-concurrency worker pool shared by every stage
//! - [`membership`] - Bulk enrolment changes
//! - [`mirror`] - One complete run, built from a [`MirrorConfig`]

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod batch;
pub mod config;
pub mod download;
pub mod links;
pub mod membership;
pub mod mirror;
pub mod model;
pub mod naming;
pub mod queue;
pub mod task;
pub mod walker;

mod user_agent;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test_support;

// Re-export commonly used types
pub use api::{ApiError, ContentSource, MoodleClient};
pub use batch::{BatchError, BatchRunner};
pub use config::{ConfigError, MirrorConfig};
pub use download::{
    BatchSummary, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, Dispatcher, DownloadError,
    FailureType, HttpTransport, RetryDecision, RetryPolicy, Transport, classify_error,
};
pub use links::{HtmlLinkExtractor, LinkExtractor};
pub use membership::{MembershipChange, MembershipSummary, SelfEnrol, run_membership_batch};
pub use mirror::{Mirror, MirrorError, RunSummary};
pub use queue::{DownloadQueue, EnqueueDecision};
pub use task::{DownloadTask, HtmlPage};
pub use walker::{Discovery, HierarchyWalker};
