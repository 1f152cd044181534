//! Access to the remote course tree.
//!
//! The walker only depends on the [`ContentSource`] trait; [`MoodleClient`]
//! is the production implementation backed by the Moodle REST web service.

mod client;
mod error;

pub use client::MoodleClient;
pub use error::ApiError;

use async_trait::async_trait;
use url::Url;

use crate::model::{DiscussionPage, Section};

/// Content tree fetcher used by the hierarchy walker.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Base URL of the site; anchors on other origins are never downloaded.
    fn site_url(&self) -> &Url;

    /// Rewrites a file URL so that it can be fetched without further
    /// authentication. The default returns the URL unchanged.
    fn authorize_url(&self, file_url: &str) -> String {
        file_url.to_string()
    }

    /// Returns the sections (with modules) of a course.
    async fn course_contents(&self, course_id: u64) -> Result<Vec<Section>, ApiError>;

    /// Returns one page of forum discussions. `page = 0, per_page = 0`
    /// requests every discussion at once.
    async fn forum_discussions(
        &self,
        forum_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<DiscussionPage, ApiError>;
}
