//! CLI entry point for the course mirror.

use anyhow::{Context, Result};
use clap::Parser;
use cms_scraper_core::Mirror;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(
        server = %args.server,
        category = ?args.category,
        handouts = args.handouts,
        html = args.html,
        all = args.all,
        "CLI arguments parsed"
    );

    let config = args.to_config();
    info!(base_dir = %config.base_dir().display(), "cms-scraper starting");

    let mirror = Mirror::new(config).context("failed to set up the mirror")?;
    if args.all {
        let enrolment = mirror.enrol_all().await.context("course enrolment failed")?;
        info!(
            enrolled = enrolment.applied,
            unchanged = enrolment.unchanged,
            failed = enrolment.failed,
            "Enrolment complete"
        );
    }
    let summary = mirror.run().await.context("mirror run failed")?;

    if summary.downloads.failed > 0 || summary.pages.failed > 0 {
        warn!(
            files = summary.downloads.failed,
            pages = summary.pages.failed,
            "some items could not be saved, re-run to retry them"
        );
    }
    info!(
        courses = summary.courses,
        downloaded = summary.downloads.completed,
        skipped = summary.downloads.skipped,
        pages = summary.pages.completed,
        "Mirror complete"
    );

    Ok(())
}
