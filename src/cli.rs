//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use cms_scraper_core::MirrorConfig;
use cms_scraper_core::config::DEFAULT_SERVER;
use cms_scraper_core::walker::DEFAULT_FETCH_CONCURRENCY;
use cms_scraper_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Mirror Moodle course content onto the local filesystem.
///
/// Walks every enrolled course (sections, modules, forum discussions) and
/// downloads its files into `<destination>/<category or CMS>/`. Files already
/// present with the expected size are skipped, so re-running only fetches
/// what is new.
#[derive(Parser, Debug)]
#[command(name = "cms-scraper")]
#[command(author, version, about)]
pub struct Args {
    /// Moodle web-services token
    pub token: String,

    /// Site to mirror
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: Url,

    /// Only mirror courses of this category (e.g. "Semester II 2019-20")
    #[arg(long)]
    pub category: Option<String>,

    /// Directory to download into (defaults to the current directory)
    #[arg(long)]
    pub destination: Option<PathBuf>,

    /// Download only course handouts
    #[arg(long)]
    pub handouts: bool,

    /// Save section, module and discussion HTML as well
    #[arg(long)]
    pub html: bool,

    /// Self-enrol into every course of the category (or site) before mirroring
    #[arg(long)]
    pub all: bool,

    /// Skip files of this size or larger, in MiB
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u64).range(1..=1_048_576))]
    pub max_download_size: u64,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum concurrent web-service calls (1-100)
    #[arg(long, default_value_t = DEFAULT_FETCH_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub fetch_concurrency: u8,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Abort the whole run after this many seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Maps the parsed flags onto a run configuration.
    #[must_use]
    pub fn to_config(&self) -> MirrorConfig {
        let mut config = MirrorConfig::new(self.server.clone(), self.token.clone());
        config.category = self.category.clone();
        if let Some(destination) = &self.destination {
            config.destination.clone_from(destination);
        }
        config.handouts_only = self.handouts;
        config.save_html = self.html;
        config.max_download_size = self.max_download_size.saturating_mul(BYTES_PER_MIB);
        config.download_concurrency = usize::from(self.concurrency);
        config.fetch_concurrency = usize::from(self.fetch_concurrency);
        config.max_retries = u32::from(self.max_retries);
        config.batch_timeout = self.timeout.map(Duration::from_secs);
        config
    }
}
