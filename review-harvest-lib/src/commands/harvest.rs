use super::Host;
use super::common::{ColorMode, LogLevel, init_logging};
use super::config::Config;
use super::progress_reporter::ProgressReporter;
use crate::Result;
use crate::harvest::{DiscoveryStatus, Orchestrator, Progress, RunSummary};
use crate::remote::GitHubApi;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use core::time::Duration;
use ohno::bail;
use std::io::Write;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct HarvestArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,
}

pub async fn harvest<H: Host>(host: &mut H, args: &HarvestArgs) -> Result<()> {
    init_logging(args.log_level);

    let config = Config::load(args.config.as_deref())?;

    let Some(token) = args.github_token.as_deref().filter(|t| !t.trim().is_empty()) else {
        bail!("a GitHub token is required: pass --github-token or set the GITHUB_TOKEN environment variable");
    };

    let api = Arc::new(
        GitHubApi::new(token, &config.api_url, config.request_timeout)?
            .with_transient_retries(config.transient_retries, config.transient_retry_delay),
    );

    // With logging enabled, log lines replace the progress bar
    let delay = if args.log_level == LogLevel::None {
        Duration::from_millis(300)
    } else {
        Duration::from_hours(365 * 24)
    };

    let progress: Arc<dyn Progress> = Arc::new(ProgressReporter::new(delay, args.color.use_colors()));

    let summary = Orchestrator::new(api, config.harvest_settings(), progress).await?.run().await?;

    write_summary(host, &summary, &config.output_path);
    Ok(())
}

fn write_summary<H: Host>(host: &mut H, summary: &RunSummary, output_path: &Utf8Path) {
    let mut out = host.output();
    let _ = writeln!(
        out,
        "Harvested {} repositories, adding {} records to '{output_path}' ({} total)",
        summary.candidates_processed, summary.records_added, summary.total_rows
    );
    drop(out);

    if summary.stopped_by_quota {
        let _ = writeln!(
            host.error(),
            "Stopped early after the API quota ran out; run again later to continue"
        );
    } else if summary.discovery != DiscoveryStatus::Complete {
        let _ = writeln!(
            host.error(),
            "Repository discovery ended early ({}); {} repositories were found",
            summary.discovery,
            summary.candidates_discovered
        );
    }
}
