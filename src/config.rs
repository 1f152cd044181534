//! Run configuration.
//!
//! [`MirrorConfig`] replaces process-wide settings: everything a run needs is
//! carried here and checked once by [`MirrorConfig::validate`] before any
//! network traffic happens.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::batch::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT,
    READ_TIMEOUT_SECS,
};
use crate::membership::DEFAULT_MEMBERSHIP_CONCURRENCY;
use crate::naming::path_component;
use crate::queue::DEFAULT_MAX_DOWNLOAD_SIZE;
use crate::walker::DEFAULT_FETCH_CONCURRENCY;

/// Site mirrored when no server is given.
pub const DEFAULT_SERVER: &str = "https://cms.bits-hyderabad.ac.in";

/// Directory under the destination used when no category is selected.
pub const DEFAULT_CATEGORY_DIR: &str = "CMS";

/// Longest accepted timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The web-service token is empty.
    #[error("web-service token must not be empty")]
    EmptyToken,

    /// A concurrency limit is outside the accepted range.
    #[error("{name} must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {value}")]
    Concurrency {
        /// Which limit was rejected.
        name: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// Too many retries requested.
    #[error("max retries must be at most {MAX_RETRIES_LIMIT}, got {value}")]
    Retries {
        /// The rejected value.
        value: u32,
    },

    /// A timeout is zero or longer than an hour.
    #[error("{name} must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {secs}s")]
    Timeout {
        /// Which timeout was rejected.
        name: &'static str,
        /// The rejected value in whole seconds.
        secs: u64,
    },

    /// The size ceiling would reject every file.
    #[error("maximum download size must be greater than zero")]
    ZeroSizeCeiling,

    /// The server URL cannot serve a web service.
    #[error("server URL {url} must use http or https")]
    UnsupportedServer {
        /// The rejected URL.
        url: String,
    },
}

/// Everything one mirroring run needs.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Moodle web-service token.
    pub token: String,
    /// Site root.
    pub server: Url,
    /// Only mirror courses of this category, by name.
    pub category: Option<String>,
    /// Parent of the base directory.
    pub destination: PathBuf,
    /// Download only each course's handout.
    pub handouts_only: bool,
    /// Also save section, module and discussion HTML.
    pub save_html: bool,
    /// Files at least this large (bytes) are skipped.
    pub max_download_size: u64,
    /// Simultaneous file downloads.
    pub download_concurrency: usize,
    /// Simultaneous content-tree fetches.
    pub fetch_concurrency: usize,
    /// Simultaneous membership calls.
    pub membership_concurrency: usize,
    /// Retries after the first attempt of a download.
    pub max_retries: u32,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Idle timeout between body reads.
    pub read_timeout: Duration,
    /// Upper bound on the whole run; `None` waits indefinitely.
    pub batch_timeout: Option<Duration>,
}

impl MirrorConfig {
    /// Creates a configuration with default limits for `server` and `token`,
    /// mirroring into the current directory.
    #[must_use]
    pub fn new(server: Url, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            server,
            category: None,
            destination: PathBuf::from("."),
            handouts_only: false,
            save_html: false,
            max_download_size: DEFAULT_MAX_DOWNLOAD_SIZE,
            download_concurrency: DEFAULT_CONCURRENCY,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            membership_concurrency: DEFAULT_MEMBERSHIP_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            batch_timeout: None,
        }
    }

    /// Directory every course folder is created under:
    /// `destination/<category>` or `destination/CMS`.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        match self.category.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                self.destination.join(path_component(name, None))
            }
            _ => self.destination.join(DEFAULT_CATEGORY_DIR),
        }
    }

    /// Checks every limit.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if !matches!(self.server.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedServer {
                url: self.server.to_string(),
            });
        }

        check_concurrency("download concurrency", self.download_concurrency)?;
        check_concurrency("fetch concurrency", self.fetch_concurrency)?;
        check_concurrency("membership concurrency", self.membership_concurrency)?;

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Retries {
                value: self.max_retries,
            });
        }

        check_timeout("connect timeout", self.connect_timeout)?;
        check_timeout("read timeout", self.read_timeout)?;
        if let Some(timeout) = self.batch_timeout {
            check_timeout("batch timeout", timeout)?;
        }

        if self.max_download_size == 0 {
            return Err(ConfigError::ZeroSizeCeiling);
        }
        Ok(())
    }
}

fn check_concurrency(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Concurrency { name, value })
    }
}

fn check_timeout(name: &'static str, timeout: Duration) -> Result<(), ConfigError> {
    let secs = timeout.as_secs();
    if timeout < Duration::from_secs(1) || secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Timeout { name, secs });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> MirrorConfig {
        MirrorConfig::new(Url::parse(DEFAULT_SERVER).unwrap(), "abc123")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.download_concurrency, 10);
        assert_eq!(config.fetch_concurrency, 25);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_download_size, 512 * 1024 * 1024);
        assert_eq!(config.read_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_base_dir_uses_category_or_cms() {
        let mut config = config();
        config.destination = PathBuf::from("/srv/mirror");
        assert_eq!(config.base_dir(), PathBuf::from("/srv/mirror/CMS"));

        config.category = Some("  ".to_string());
        assert_eq!(config.base_dir(), PathBuf::from("/srv/mirror/CMS"));

        config.category = Some("Semester II 2019-20".to_string());
        assert_eq!(
            config.base_dir(),
            PathBuf::from("/srv/mirror/Semester II 2019-20")
        );
    }

    #[test]
    fn test_rejects_out_of_range_concurrency() {
        let mut config = config();
        config.download_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Concurrency { value: 0, .. })
        ));

        let mut config = self::config();
        config.fetch_concurrency = 101;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("fetch concurrency"));
    }

    #[test]
    fn test_rejects_too_many_retries() {
        let mut config = config();
        config.max_retries = 10;
        assert!(config.validate().is_ok());
        config.max_retries = 11;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Retries { value: 11 })
        ));
    }

    #[test]
    fn test_rejects_bad_timeouts() {
        let mut config = config();
        config.connect_timeout = Duration::from_millis(500);
        assert!(matches!(config.validate(), Err(ConfigError::Timeout { .. })));

        let mut config = self::config();
        config.batch_timeout = Some(Duration::from_secs(3601));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Timeout {
                name: "batch timeout",
                secs: 3601
            })
        ));
    }

    #[test]
    fn test_rejects_zero_ceiling_and_empty_token() {
        let mut config = config();
        config.max_download_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSizeCeiling)));

        let mut config = self::config();
        config.token = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyToken)));
    }

    #[test]
    fn test_rejects_non_http_server() {
        let config = MirrorConfig::new(Url::parse("ftp://cms.test").unwrap(), "abc");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedServer { .. })
        ));
    }
}
