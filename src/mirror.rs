//! One complete mirroring run.
//!
//! [`Mirror`] owns everything a run shares: the configuration, one
//! `reqwest::Client` (and its connection pool) used by both the web-service
//! client and file transfers, the hierarchy walker and the dispatcher.
//! Dropping it releases the pool.
//!
//! A run resolves the token owner, lists their courses, discovers every
//! course concurrently into a shared [`DownloadQueue`], then drains the
//! queue through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, ContentSource, MoodleClient};
use crate::batch::{BatchError, BatchRunner};
use crate::config::{ConfigError, MirrorConfig};
use crate::download::{BatchSummary, Dispatcher, HttpTransport, RetryPolicy, build_http_client};
use crate::membership::{MembershipSummary, SelfEnrol, pending_enrolments, run_membership_batch};
use crate::model::Course;
use crate::naming::humanize_size;
use crate::queue::DownloadQueue;
use crate::walker::{Discovery, HierarchyWalker};

/// Errors that stop a run as a whole.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[source] ConfigError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The server URL has no usable web-service endpoint.
    #[error("invalid server URL: {0}")]
    Server(#[source] url::ParseError),

    /// A web-service call the run depends on failed.
    #[error(transparent)]
    Api(ApiError),

    /// A worker pool could not be created.
    #[error(transparent)]
    Batch(BatchError),

    /// The base directory could not be created.
    #[error("failed to create {path}: {source}")]
    Io {
        /// Directory being created.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The run exceeded its time limit; in-flight work was abandoned.
    #[error("run timed out after {}s", .after.as_secs())]
    TimedOut {
        /// The configured limit.
        after: Duration,
    },
}

/// Counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Courses walked.
    pub courses: usize,
    /// Files found before deduplication and the size ceiling.
    pub discovered: usize,
    /// Files accepted by the queue.
    pub queued: usize,
    /// Outcome of the file downloads.
    pub downloads: BatchSummary,
    /// Outcome of the HTML page writes.
    pub pages: BatchSummary,
}

/// Shared context of a mirroring run.
#[derive(Debug)]
pub struct Mirror {
    config: MirrorConfig,
    client: MoodleClient,
    walker: HierarchyWalker,
    dispatcher: Dispatcher,
}

impl Mirror {
    /// Validates `config` and builds the run context.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Config`] for invalid settings and
    /// [`MirrorError::Client`] or [`MirrorError::Server`] if the HTTP side
    /// cannot be set up.
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        config.validate().map_err(MirrorError::Config)?;

        let http = build_http_client(config.connect_timeout, config.read_timeout)
            .map_err(MirrorError::Client)?;
        let client = MoodleClient::new(http.clone(), config.server.clone(), config.token.clone())
            .map_err(MirrorError::Server)?;

        let source: Arc<dyn ContentSource> = Arc::new(client.clone());
        let walker = HierarchyWalker::new(source, config.base_dir(), config.fetch_concurrency)
            .map_err(MirrorError::Batch)?
            .with_html(config.save_html);

        let dispatcher = Dispatcher::new(
            Arc::new(HttpTransport::new(http)),
            config.download_concurrency,
        )
        .map_err(MirrorError::Batch)?
        .with_retry_policy(RetryPolicy::with_max_retries(config.max_retries))
        .with_max_download_size(config.max_download_size);

        debug!(server = %config.server, base_dir = %config.base_dir().display(), "mirror ready");
        Ok(Self {
            config,
            client,
            walker,
            dispatcher,
        })
    }

    /// Returns the configuration of this run.
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Mirrors every enrolled course (of the configured category).
    ///
    /// # Errors
    ///
    /// Fails only when the run cannot start or exceeds its time limit;
    /// individual course, file and page failures are counted in the summary.
    pub async fn run(&self) -> Result<RunSummary, MirrorError> {
        match self.config.batch_timeout {
            Some(after) => tokio::time::timeout(after, self.run_to_completion())
                .await
                .map_err(|_| {
                    warn!(seconds = after.as_secs(), "run timed out, abandoning in-flight work");
                    MirrorError::TimedOut { after }
                })?,
            None => self.run_to_completion().await,
        }
    }

    #[instrument(skip_all, fields(server = %self.config.server))]
    async fn run_to_completion(&self) -> Result<RunSummary, MirrorError> {
        let courses = self.selected_courses().await?;

        let base_dir = self.config.base_dir();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|source| MirrorError::Io {
                path: base_dir.clone(),
                source,
            })?;

        let mut summary = RunSummary {
            courses: courses.len(),
            ..RunSummary::default()
        };
        let queue = Arc::new(DownloadQueue::new(self.config.max_download_size));
        summary.discovered = self.discover(courses, &queue).await?;
        summary.queued = queue.len();

        let tasks = queue.drain();
        if tasks.is_empty() {
            info!("no files to download");
        } else {
            info!(files = tasks.len(), "downloading files");
            summary.downloads = self.dispatcher.run_batch(tasks).await;
        }

        if self.config.save_html {
            let pages = queue.drain_pages();
            if pages.is_empty() {
                info!("no html pages to save");
            } else {
                info!(pages = pages.len(), "saving html pages");
                summary.pages = self.dispatcher.write_pages(pages).await;
            }
        }

        info!(
            courses = summary.courses,
            discovered = summary.discovered,
            queued = summary.queued,
            completed = summary.downloads.completed,
            skipped = summary.downloads.skipped,
            failed = summary.downloads.failed,
            size = %humanize_size(summary.downloads.bytes),
            "mirror complete"
        );
        Ok(summary)
    }

    /// Enrolled courses, narrowed to the configured category.
    async fn selected_courses(&self) -> Result<Vec<Course>, MirrorError> {
        let site = self.client.site_info().await.map_err(MirrorError::Api)?;
        info!(user_id = site.user_id, site = %site.site_name, "token verified");

        let courses = self
            .client
            .enrolled_courses(site.user_id)
            .await
            .map_err(MirrorError::Api)?;
        self.in_category(courses).await
    }

    async fn in_category(&self, courses: Vec<Course>) -> Result<Vec<Course>, MirrorError> {
        let Some(name) = self
            .config
            .category
            .as_deref()
            .filter(|name| !name.trim().is_empty())
        else {
            return Ok(courses);
        };
        let category_id = self
            .client
            .category_id(name)
            .await
            .map_err(MirrorError::Api)?;
        let selected: Vec<Course> = courses
            .into_iter()
            .filter(|course| course.category_id == Some(category_id))
            .collect();
        debug!(category = name, courses = selected.len(), "filtered by category");
        Ok(selected)
    }

    /// Walks every course, feeding the queue. Returns the number of files seen.
    async fn discover(
        &self,
        courses: Vec<Course>,
        queue: &Arc<DownloadQueue>,
    ) -> Result<usize, MirrorError> {
        let runner =
            BatchRunner::new(self.config.fetch_concurrency).map_err(MirrorError::Batch)?;
        let walker = self.walker.clone();
        let handouts_only = self.config.handouts_only;
        let shared = Arc::clone(queue);

        let results = runner
            .run(courses, move |course| {
                let walker = walker.clone();
                let queue = Arc::clone(&shared);
                async move {
                    let discovery = if handouts_only {
                        Discovery {
                            tasks: walker.discover_handout(&course).await.into_iter().collect(),
                            pages: Vec::new(),
                        }
                    } else {
                        walker.discover(&course).await
                    };
                    let found = discovery.tasks.len();
                    for task in discovery.tasks {
                        queue.enqueue(task).await;
                    }
                    for page in discovery.pages {
                        queue.enqueue_page(page).await;
                    }
                    Ok::<_, std::convert::Infallible>(found)
                }
            })
            .await;

        Ok(results.into_iter().filter_map(Result::ok).sum())
    }

    /// Self-enrols into every course of the configured category (or the whole
    /// site) the token owner is not yet enrolled in.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Api`] if the course listings cannot be fetched.
    #[instrument(skip_all)]
    pub async fn enrol_all(&self) -> Result<MembershipSummary, MirrorError> {
        let site = self.client.site_info().await.map_err(MirrorError::Api)?;
        let enrolled = self
            .client
            .enrolled_courses(site.user_id)
            .await
            .map_err(MirrorError::Api)?;
        let catalogue = self.client.all_courses().await.map_err(MirrorError::Api)?;
        let candidates = self.in_category(catalogue).await?;

        let pending = pending_enrolments(candidates, &enrolled);
        info!(courses = pending.len(), "enrolling into courses");
        run_membership_batch(
            pending,
            Arc::new(SelfEnrol::new(self.client.clone())),
            self.config.membership_concurrency,
        )
        .await
        .map_err(MirrorError::Batch)
    }
}
