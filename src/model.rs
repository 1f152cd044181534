//! Remote course hierarchy as returned by the Moodle web-service API.
//!
//! These types are ephemeral: they live for one discovery pass and are
//! discarded once download tasks have been derived from them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// A course the user can see, from the enrolled or catalogue listings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Course {
    /// Remote course id.
    pub id: u64,
    /// Display name, possibly HTML-escaped (`&amp;`).
    #[serde(rename = "fullname")]
    pub full_name: String,
    /// Category id. `core_enrol_get_users_courses` calls it `category`,
    /// `core_course_get_courses_by_field` calls it `categoryid`.
    #[serde(default, rename = "category", alias = "categoryid")]
    pub category_id: Option<u64>,
}

impl Course {
    /// Creates a course value (mainly for tests and callers building fixtures).
    #[must_use]
    pub fn new(id: u64, full_name: impl Into<String>, category_id: Option<u64>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            category_id,
        }
    }
}

/// One section (topic/week) of a course.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Section {
    /// Section title.
    #[serde(default)]
    pub name: String,
    /// Free-form HTML summary; teachers often embed file links here.
    #[serde(default, rename = "summary")]
    pub summary_html: String,
    /// Activities in the section. Missing for some section types.
    #[serde(default, deserialize_with = "skip_malformed")]
    pub modules: Vec<Module>,
}

/// Kind of a course module, derived from Moodle's `modname`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ModuleKind {
    /// A single uploaded file.
    Resource,
    /// A folder of uploaded files.
    Folder,
    /// A discussion forum.
    Forum,
    /// Anything else (quiz, url, label, ...), kept for logging.
    Other(String),
}

impl From<String> for ModuleKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "resource" => Self::Resource,
            "folder" => Self::Folder,
            "forum" => Self::Forum,
            _ => Self::Other(value),
        }
    }
}

/// An activity inside a section.
#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    /// Display name.
    pub name: String,
    /// Module kind.
    #[serde(rename = "modname")]
    pub kind: ModuleKind,
    /// Instance id; for forums this is the forum id.
    #[serde(default)]
    pub instance: u64,
    /// Optional HTML description.
    #[serde(default)]
    pub description: Option<String>,
    /// Files of a resource/folder module. `None` when the field is absent.
    #[serde(default, deserialize_with = "skip_malformed_opt")]
    pub contents: Option<Vec<Content>>,
}

/// A downloadable file attached to a module or forum discussion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Content {
    /// `file` or `url` for module contents; absent on attachments.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Original file name on the server.
    #[serde(default, rename = "filename")]
    pub file_name: String,
    /// Download URL (still needs the token appended). Book chapters and
    /// other structural entries carry `null` here.
    #[serde(default, rename = "fileurl")]
    pub file_url: Option<String>,
    /// Server-reported size in bytes.
    #[serde(default, rename = "filesize")]
    pub declared_size: Option<u64>,
}

impl Content {
    /// Returns true when the content is an uploaded file (or untyped attachment).
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind.as_deref().is_none_or(|kind| kind == "file")
    }
}

/// Forum attachments share the shape of module contents.
pub type Attachment = Content;

/// One discussion thread in a forum module.
#[derive(Debug, Clone, Deserialize)]
pub struct ForumDiscussion {
    /// Discussion subject.
    pub name: String,
    /// First post body (HTML).
    #[serde(default)]
    pub message: Option<String>,
    /// Files attached to the first post.
    #[serde(default, deserialize_with = "skip_malformed")]
    pub attachments: Vec<Attachment>,
}

/// Response of the forum discussion listing.
///
/// Moodle answers with an exception object instead of an empty list when a
/// forum has no discussions configured, so both shapes are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DiscussionPage {
    /// Regular listing.
    Discussions {
        /// Discussions on this page.
        discussions: Vec<ForumDiscussion>,
    },
    /// Logical exception payload.
    Exception {
        /// Exception class name.
        exception: String,
        /// Machine-readable error code.
        #[serde(default)]
        errorcode: Option<String>,
        /// Human-readable message.
        #[serde(default)]
        message: Option<String>,
    },
}

impl DiscussionPage {
    /// Discussions on the page; an exception payload counts as none.
    #[must_use]
    pub fn into_discussions(self) -> Vec<ForumDiscussion> {
        match self {
            Self::Discussions { discussions } => discussions,
            Self::Exception { .. } => Vec::new(),
        }
    }
}

/// A course category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    /// Category id.
    pub id: u64,
    /// Category display name, e.g. `Semester II 2019-20`.
    pub name: String,
}

/// Decodes a list element by element, dropping (and logging) entries that do
/// not match `T`. A `null` list decodes as empty.
fn skip_malformed<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(skip_malformed_opt(deserializer)?.unwrap_or_default())
}

fn skip_malformed_opt<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(values) = Option::<Vec<Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let items = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(error = %error, "skipping malformed entry");
                None
            }
        })
        .collect();
    Ok(Some(items))
}

/// Subset of `core_webservice_get_site_info` used by the crawler.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteInfo {
    /// Id of the user owning the token.
    #[serde(rename = "userid")]
    pub user_id: u64,
    /// Site display name.
    #[serde(default, rename = "sitename")]
    pub site_name: String,
}
