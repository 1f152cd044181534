//! Deduplicating, size-gated holding area for pending downloads.
//!
//! Discovery branches for different courses enqueue concurrently. The
//! already-on-disk check runs on tokio's blocking pool before any map entry
//! is taken; the final duplicate check and the insert happen under the
//! destination's entry, so two branches can never both accept the same path.
//!
//! # Example
//!
//! ```
//! use cms_scraper_core::queue::{DownloadQueue, EnqueueDecision};
//! use cms_scraper_core::DownloadTask;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = DownloadQueue::default();
//! let task = DownloadTask::new("https://cms.example.edu/f.pdf", "/tmp/mirror", "f.pdf", Some(10));
//! assert!(queue.enqueue(task.clone()).await.is_accepted());
//! assert_eq!(queue.enqueue(task).await, EnqueueDecision::Duplicate);
//! assert_eq!(queue.len(), 1);
//! # }
//! ```

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::naming::humanize_size;
use crate::task::{DownloadTask, HtmlPage};

/// Files of this size or larger are never downloaded (512 MiB).
pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Outcome of offering a task to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueDecision {
    /// The task will be handed to the dispatcher.
    Accepted,
    /// Declared size is at or above the ceiling.
    TooLarge,
    /// A file with exactly the declared size is already on disk.
    AlreadyPresent,
    /// Another task already targets the same destination.
    Duplicate,
}

impl EnqueueDecision {
    /// Returns true if the task was queued.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Identity of a queued task.
///
/// Tasks without a file name cannot be keyed by path until the response
/// arrives, so they are keyed by directory and URL instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    Path(PathBuf),
    Unnamed { dir: PathBuf, url: String },
}

impl QueueKey {
    fn of(task: &DownloadTask) -> Self {
        match task.destination() {
            Some(path) => Self::Path(path),
            None => Self::Unnamed {
                dir: task.dest_dir.clone(),
                url: task.url.clone(),
            },
        }
    }
}

/// Concurrent download queue keyed by destination path.
#[derive(Debug)]
pub struct DownloadQueue {
    max_download_size: u64,
    tasks: DashMap<QueueKey, DownloadTask>,
    pages: DashMap<PathBuf, HtmlPage>,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOWNLOAD_SIZE)
    }
}

impl DownloadQueue {
    /// Creates an empty queue rejecting files of `max_download_size` bytes or more.
    #[must_use]
    pub fn new(max_download_size: u64) -> Self {
        Self {
            max_download_size,
            tasks: DashMap::new(),
            pages: DashMap::new(),
        }
    }

    /// Returns the size ceiling in bytes.
    #[must_use]
    pub fn max_download_size(&self) -> u64 {
        self.max_download_size
    }

    /// Offers a task to the queue.
    pub async fn enqueue(&self, task: DownloadTask) -> EnqueueDecision {
        if let Some(size) = task.declared_size
            && size >= self.max_download_size
        {
            info!(
                url = %task.url,
                size = %humanize_size(size),
                limit = %humanize_size(self.max_download_size),
                "skipping file: exceeds size limit"
            );
            return EnqueueDecision::TooLarge;
        }

        let key = QueueKey::of(&task);
        if self.tasks.contains_key(&key) {
            debug!(url = %task.url, "destination already queued");
            return EnqueueDecision::Duplicate;
        }
        if let (Some(size), Some(path)) = (task.declared_size, task.destination())
            && file_has_size(&path, size).await
        {
            debug!(path = %path.display(), "file already present");
            return EnqueueDecision::AlreadyPresent;
        }

        match self.tasks.entry(key) {
            Entry::Occupied(_) => {
                debug!(url = %task.url, "destination already queued");
                EnqueueDecision::Duplicate
            }
            Entry::Vacant(slot) => {
                slot.insert(task);
                EnqueueDecision::Accepted
            }
        }
    }

    /// Offers an HTML snapshot to the queue.
    ///
    /// Pages are skipped when a file of the same byte length already exists.
    pub async fn enqueue_page(&self, page: HtmlPage) -> EnqueueDecision {
        let path = page.destination();
        if self.pages.contains_key(&path) {
            return EnqueueDecision::Duplicate;
        }
        if file_has_size(&path, page.size()).await {
            return EnqueueDecision::AlreadyPresent;
        }
        match self.pages.entry(path) {
            Entry::Occupied(_) => EnqueueDecision::Duplicate,
            Entry::Vacant(slot) => {
                slot.insert(page);
                EnqueueDecision::Accepted
            }
        }
    }

    /// Number of queued download tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when no download task is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of queued HTML pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Removes and returns every queued download task.
    pub fn drain(&self) -> Vec<DownloadTask> {
        let keys: Vec<QueueKey> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.tasks.remove(&key).map(|(_, task)| task))
            .collect()
    }

    /// Removes and returns every queued HTML page.
    pub fn drain_pages(&self) -> Vec<HtmlPage> {
        let keys: Vec<PathBuf> = self.pages.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.pages.remove(&key).map(|(_, page)| page))
            .collect()
    }
}

/// Returns true if `path` is a regular file of exactly `size` bytes.
async fn file_has_size(path: &Path, size: u64) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() == size)
}
