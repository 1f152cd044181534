//! User-Agent sent with web-service calls and file downloads.

const TOOL_NAME: &str = "cms-scraper";

/// Identifies the tool and its version, e.g. `cms-scraper/0.1.0 (course-mirror)`.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{TOOL_NAME}/{version} (course-mirror)")
}
