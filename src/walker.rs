//! Discovery of downloadable content in a course hierarchy.
//!
//! The [`HierarchyWalker`] turns one course into the [`DownloadTask`]s and
//! [`HtmlPage`]s needed to mirror it, creating the directory tree on the way:
//!
//! ```text
//! <base>/<course>/<L1>/<section>/<module>/[<discussion>/]<file>
//! ```
//!
//! It never downloads files itself. Sections, modules and discussions are
//! explored concurrently; every web-service call goes through a shared fetch
//! semaphore. A directory is always created (and awaited) before anything
//! targeting it is emitted. Missing structure is logged and skipped, never
//! fatal.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use futures_util::future::join_all;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, trace, warn};

use crate::api::{ApiError, ContentSource};
use crate::batch::{BatchError, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::links::{HtmlLinkExtractor, LinkExtractor, decode_entities};
use crate::model::{Content, Course, DiscussionPage, ForumDiscussion, Module, ModuleKind, Section};
use crate::naming::{dir_component, path_component, sanitize, split_extension};
use crate::task::{DownloadTask, HtmlPage};

/// Default number of simultaneous web-service calls.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 25;

/// Module name identifying a course handout (compared case-insensitively).
const HANDOUT_MODULE: &str = "handout";

/// File name stem given to handout files inside their module directory.
const HANDOUT_STEM: &str = "HANDOUT";

/// `<course name> <L|T|P><n> <rest>`
#[allow(clippy::expect_used)]
static COURSE_TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w\d \-/'&,]+) ([LTP]\d*)(\z|\s)(.*)$").expect("course title regex is valid") // Static pattern, safe to panic
});

/// Course name and section label parsed from a course's full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseTitle {
    /// Course name, e.g. `CS F111 Computer Programming`.
    pub name: String,
    /// Lecture, tutorial or practical label, e.g. `L1`.
    pub section_label: String,
}

/// Parses an (HTML-escaped) course full name.
///
/// Returns `None` for names that do not end their course part with a
/// section label.
///
/// # Example
///
/// ```
/// use cms_scraper_core::walker::parse_course_title;
///
/// let title = parse_course_title("MATH F112 Mathematics &amp; Logic L2").unwrap();
/// assert_eq!(title.name, "MATH F112 Mathematics & Logic");
/// assert_eq!(title.section_label, "L2");
/// assert!(parse_course_title("Library Orientation").is_none());
/// ```
#[must_use]
pub fn parse_course_title(full_name: &str) -> Option<CourseTitle> {
    let decoded = decode_entities(full_name);
    let captures = COURSE_TITLE_PATTERN.captures(decoded.trim())?;
    Some(CourseTitle {
        name: captures.get(1)?.as_str().trim().to_string(),
        section_label: captures.get(2)?.as_str().to_string(),
    })
}

/// Everything found in one course.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Files to download.
    pub tasks: Vec<DownloadTask>,
    /// HTML snapshots to save (empty unless HTML saving is enabled).
    pub pages: Vec<HtmlPage>,
}

impl Discovery {
    fn merge(&mut self, other: Discovery) {
        self.tasks.extend(other.tasks);
        self.pages.extend(other.pages);
    }

    fn merge_all(parts: impl IntoIterator<Item = Discovery>) -> Self {
        let mut merged = Self::default();
        for part in parts {
            merged.merge(part);
        }
        merged
    }

    /// Returns true when nothing was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.pages.is_empty()
    }
}

/// Walks courses into download tasks.
///
/// Cheap to clone; clones share the content source and the fetch limit.
#[derive(Clone)]
pub struct HierarchyWalker {
    source: Arc<dyn ContentSource>,
    links: Arc<dyn LinkExtractor>,
    base_dir: PathBuf,
    save_html: bool,
    fetch_limit: Arc<Semaphore>,
}

impl std::fmt::Debug for HierarchyWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyWalker")
            .field("site", &self.source.site_url().as_str())
            .field("base_dir", &self.base_dir)
            .field("save_html", &self.save_html)
            .finish_non_exhaustive()
    }
}

impl HierarchyWalker {
    /// Creates a walker writing under `base_dir` with at most
    /// `fetch_concurrency` web-service calls in flight.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `fetch_concurrency` is
    /// outside 1-100.
    pub fn new(
        source: Arc<dyn ContentSource>,
        base_dir: impl Into<PathBuf>,
        fetch_concurrency: usize,
    ) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&fetch_concurrency) {
            return Err(BatchError::InvalidConcurrency {
                value: fetch_concurrency,
            });
        }
        Ok(Self {
            source,
            links: Arc::new(HtmlLinkExtractor),
            base_dir: base_dir.into(),
            save_html: false,
            fetch_limit: Arc::new(Semaphore::new(fetch_concurrency)),
        })
    }

    /// Enables or disables HTML snapshots.
    #[must_use]
    pub fn with_html(mut self, save_html: bool) -> Self {
        self.save_html = save_html;
        self
    }

    /// Replaces the link extractor used on section summaries.
    #[must_use]
    pub fn with_link_extractor(mut self, links: Arc<dyn LinkExtractor>) -> Self {
        self.links = links;
        self
    }

    /// Root of the mirror.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Discovers every file (and, if enabled, HTML page) of `course`.
    #[instrument(skip_all, fields(course_id = course.id))]
    pub async fn discover(&self, course: &Course) -> Discovery {
        let Some(title) = parse_course_title(&course.full_name) else {
            warn!(name = %course.full_name, "course name has no section label, skipping");
            return Discovery::default();
        };

        let course_dir = self
            .base_dir
            .join(path_component(&title.name, None))
            .join(&title.section_label);
        if !ensure_dir(&course_dir).await {
            return Discovery::default();
        }

        let sections = match self.course_contents(course.id).await {
            Ok(sections) => sections,
            Err(error) => {
                warn!(error = %error, "failed to fetch course contents, skipping course");
                return Discovery::default();
            }
        };

        let discovery = Discovery::merge_all(
            join_all(
                sections
                    .iter()
                    .map(|section| self.discover_section(section, &course_dir)),
            )
            .await,
        );

        info!(
            course = %title.name,
            section = %title.section_label,
            files = discovery.tasks.len(),
            pages = discovery.pages.len(),
            "finished processing course"
        );
        discovery
    }

    /// Finds the handout of `course`, stored in the base directory as
    /// `<course>_HANDOUT<ext>`.
    #[instrument(skip_all, fields(course_id = course.id))]
    pub async fn discover_handout(&self, course: &Course) -> Option<DownloadTask> {
        let Some(title) = parse_course_title(&course.full_name) else {
            warn!(name = %course.full_name, "course name has no section label, skipping");
            return None;
        };

        let sections = match self.course_contents(course.id).await {
            Ok(sections) => sections,
            Err(error) => {
                warn!(error = %error, "failed to fetch course contents");
                return None;
            }
        };

        let content = sections
            .iter()
            .flat_map(|section| &section.modules)
            .filter(|module| is_handout(&module.name))
            .filter_map(|module| module.contents.as_ref()?.first())
            .find(|content| content.is_file())?;
        let Some(file_url) = content.file_url.as_deref() else {
            debug!(course = %title.name, "handout has no download url");
            return None;
        };

        if !ensure_dir(&self.base_dir).await {
            return None;
        }

        let (_, ext) = split_extension(&content.file_name);
        info!(course = %title.name, "queuing handout");
        Some(
            DownloadTask::new(
                self.source.authorize_url(file_url),
                &self.base_dir,
                format!("{}_{HANDOUT_STEM}", path_component(&title.name, None)),
                None,
            )
            .with_extension(sanitize(ext)),
        )
    }

    async fn course_contents(&self, course_id: u64) -> Result<Vec<Section>, ApiError> {
        // The walker owns the semaphore and never closes it.
        let _permit = self.fetch_limit.acquire().await.ok();
        self.source.course_contents(course_id).await
    }

    async fn forum_discussions(&self, forum_id: u64) -> Result<DiscussionPage, ApiError> {
        let _permit = self.fetch_limit.acquire().await.ok();
        // page 0 with page size 0 lists every discussion
        self.source.forum_discussions(forum_id, 0, 0).await
    }

    async fn discover_section(&self, section: &Section, course_dir: &Path) -> Discovery {
        let name = dir_component(&section.name);
        let dir = course_dir.join(&name);
        if !ensure_dir(&dir).await {
            return Discovery::default();
        }

        let mut discovery = Discovery::default();
        if !section.summary_html.is_empty() {
            // Summaries double as announcement boards with embedded file links
            for link in self
                .links
                .same_origin_links(&section.summary_html, self.source.site_url())
            {
                trace!(link = %link, "summary link");
                discovery
                    .tasks
                    .push(DownloadTask::nameless(self.source.authorize_url(&link), &dir));
            }
            if self.save_html {
                discovery.pages.push(html_page(&section.summary_html, &dir, &name));
            }
        }

        let modules = join_all(
            section
                .modules
                .iter()
                .map(|module| self.discover_module(module, &dir)),
        )
        .await;
        for part in modules {
            discovery.merge(part);
        }
        discovery
    }

    async fn discover_module(&self, module: &Module, section_dir: &Path) -> Discovery {
        let name = dir_component(&module.name);
        let dir = section_dir.join(&name);
        if !ensure_dir(&dir).await {
            return Discovery::default();
        }

        let mut discovery = Discovery::default();
        if self.save_html
            && let Some(description) = module.description.as_deref()
            && !description.is_empty()
        {
            discovery.pages.push(html_page(description, &dir, &name));
        }

        match &module.kind {
            ModuleKind::Resource | ModuleKind::Folder => {
                let handout = is_handout(&module.name);
                discovery.tasks.extend(
                    module
                        .contents
                        .iter()
                        .flatten()
                        .filter_map(|content| self.content_task(content, &dir, handout)),
                );
            }
            ModuleKind::Forum => discovery.merge(self.discover_forum(module.instance, &dir).await),
            ModuleKind::Other(kind) => trace!(kind = %kind, "ignoring module"),
        }
        discovery
    }

    async fn discover_forum(&self, forum_id: u64, module_dir: &Path) -> Discovery {
        let discussions = match self.forum_discussions(forum_id).await {
            Ok(DiscussionPage::Exception { errorcode, .. }) => {
                debug!(forum_id, ?errorcode, "forum has no discussions");
                return Discovery::default();
            }
            Ok(page) => page.into_discussions(),
            Err(error) => {
                warn!(forum_id, error = %error, "failed to fetch forum discussions");
                return Discovery::default();
            }
        };

        Discovery::merge_all(
            join_all(
                discussions
                    .iter()
                    .map(|discussion| self.discover_discussion(discussion, module_dir)),
            )
            .await,
        )
    }

    async fn discover_discussion(&self, discussion: &ForumDiscussion, module_dir: &Path) -> Discovery {
        let name = dir_component(&discussion.name);
        let dir = module_dir.join(&name);
        if !ensure_dir(&dir).await {
            return Discovery::default();
        }

        let mut discovery = Discovery::default();
        if self.save_html
            && let Some(message) = discussion.message.as_deref()
            && !message.is_empty()
        {
            discovery.pages.push(html_page(message, &dir, &name));
        }
        discovery.tasks.extend(
            discussion
                .attachments
                .iter()
                .filter_map(|attachment| self.content_task(attachment, &dir, false)),
        );
        discovery
    }

    fn content_task(&self, content: &Content, dir: &Path, handout: bool) -> Option<DownloadTask> {
        let Some(file_url) = content.file_url.as_deref() else {
            trace!(file = %content.file_name, "content without url");
            return None;
        };
        let file_name = if handout {
            let (_, ext) = split_extension(&content.file_name);
            format!("{HANDOUT_STEM}{}", sanitize(ext))
        } else {
            path_component(&content.file_name, None)
        };
        Some(DownloadTask::new(
            self.source.authorize_url(file_url),
            dir,
            file_name,
            content.declared_size,
        ))
    }
}

fn is_handout(module_name: &str) -> bool {
    module_name.trim().eq_ignore_ascii_case(HANDOUT_MODULE)
}

fn html_page(html: &str, dir: &Path, name: &str) -> HtmlPage {
    HtmlPage {
        html: html.to_string(),
        dest_dir: dir.to_path_buf(),
        file_name: format!("{name}.html"),
    }
}

/// Creates `path` and its parents. Failures are logged, never returned.
async fn ensure_dir(path: &Path) -> bool {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => true,
        Err(error) => {
            warn!(path = %path.display(), error = %error, "cannot create directory, skipping subtree");
            false
        }
    }
}
