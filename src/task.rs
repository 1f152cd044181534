//! Work items derived from the remote course tree.

use std::path::{Path, PathBuf};

/// A file to download into the local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Fully authorized download URL.
    pub url: String,
    /// Directory the file is written into. Created by the walker.
    pub dest_dir: PathBuf,
    /// Sanitized file name, or `None` to take it from the response's
    /// `Content-Disposition` header.
    pub file_name: Option<String>,
    /// Extension appended to `file_name` (with its dot), usually empty.
    pub file_ext: String,
    /// Server-declared size in bytes, `None` when unknown at enqueue time.
    pub declared_size: Option<u64>,
}

impl DownloadTask {
    /// Creates a task whose name and size are known up front.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
        declared_size: Option<u64>,
    ) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.into(),
            file_name: Some(file_name.into()),
            file_ext: String::new(),
            declared_size,
        }
    }

    /// Creates a task whose file name is resolved from the server response.
    #[must_use]
    pub fn nameless(url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.into(),
            file_name: None,
            file_ext: String::new(),
            declared_size: None,
        }
    }

    /// Sets the extension appended to the file name.
    #[must_use]
    pub fn with_extension(mut self, file_ext: impl Into<String>) -> Self {
        self.file_ext = file_ext.into();
        self
    }

    /// Destination path, if the file name is already known.
    #[must_use]
    pub fn destination(&self) -> Option<PathBuf> {
        self.file_name
            .as_deref()
            .map(|name| destination_for(&self.dest_dir, name, &self.file_ext))
    }
}

/// Joins `dir`, `file_name` and `file_ext` into one path.
#[must_use]
pub fn destination_for(dir: &Path, file_name: &str, file_ext: &str) -> PathBuf {
    dir.join(format!("{file_name}{file_ext}"))
}

/// An HTML snapshot (section summary, module description, discussion post).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlPage {
    /// Raw HTML as served by the site.
    pub html: String,
    /// Directory the page is written into.
    pub dest_dir: PathBuf,
    /// File name including the `.html` extension.
    pub file_name: String,
}

impl HtmlPage {
    /// Destination path of the page.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        self.dest_dir.join(&self.file_name)
    }

    /// Size of the page on disk.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.html.len() as u64
    }
}
