use crate::Result;
use crate::harvest::{DiscoverySettings, HarvestSettings, ThrottleSettings};
use crate::remote::{DEFAULT_TRANSIENT_RETRIES, DEFAULT_TRANSIENT_RETRY_DELAY};
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::Deserialize;
use std::fs;
use std::io;
use url::Url;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// Configuration file looked up in the current directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Output file, doubling as the checkpoint
    #[serde(default = "default_output_path")]
    pub output_path: Utf8PathBuf,

    /// Read-only earlier outputs whose contents count as already harvested
    #[serde(default)]
    pub prior_outputs: Vec<Utf8PathBuf>,

    /// Number of repositories the output should cover
    #[serde(default = "default_target_candidate_count")]
    pub target_candidate_count: usize,

    /// Minimum number of pull requests for a repository to be harvested
    #[serde(default = "default_min_items_per_candidate")]
    pub min_items_per_candidate: u64,

    /// Repository search query
    #[serde(default = "default_search_query")]
    pub search_query: String,

    #[serde(default = "default_max_search_attempts")]
    pub max_search_attempts: u32,

    #[serde(default = "default_search_retry_delay", with = "humantime_serde")]
    pub search_retry_delay: Duration,

    /// Cap on listing pages per repository
    #[serde(default)]
    pub max_listing_pages: Option<u32>,

    /// Minimum open duration, in hours, for a pull request to count as human-reviewed
    #[serde(default = "default_min_review_hours")]
    pub min_review_hours: f64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_inter_call_delay", with = "humantime_serde")]
    pub inter_call_delay: Duration,

    #[serde(default = "default_inter_candidate_delay", with = "humantime_serde")]
    pub inter_candidate_delay: Duration,

    #[serde(default = "default_low_watermark")]
    pub low_watermark: u32,

    #[serde(default = "default_reset_buffer", with = "humantime_serde")]
    pub reset_buffer: Duration,

    #[serde(default = "default_hard_cooldown", with = "humantime_serde")]
    pub hard_cooldown: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    #[serde(default = "default_transient_retry_delay", with = "humantime_serde")]
    pub transient_retry_delay: Duration,
}

fn default_output_path() -> Utf8PathBuf {
    Utf8PathBuf::from("github_pr_reviews.csv")
}

const fn default_target_candidate_count() -> usize {
    200
}

const fn default_min_items_per_candidate() -> u64 {
    100
}

fn default_search_query() -> String {
    "stars:>1".to_string()
}

const fn default_max_search_attempts() -> u32 {
    2
}

const fn default_search_retry_delay() -> Duration {
    Duration::from_secs(60)
}

const fn default_min_review_hours() -> f64 {
    1.0
}

const fn default_worker_pool_size() -> usize {
    3
}

const fn default_inter_call_delay() -> Duration {
    Duration::from_secs(15)
}

const fn default_inter_candidate_delay() -> Duration {
    Duration::from_secs(15)
}

const fn default_low_watermark() -> u32 {
    100
}

const fn default_reset_buffer() -> Duration {
    Duration::from_secs(10)
}

const fn default_hard_cooldown() -> Duration {
    Duration::from_hours(1)
}

const fn default_max_retries() -> u32 {
    2
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_transient_retries() -> u32 {
    DEFAULT_TRANSIENT_RETRIES
}

const fn default_transient_retry_delay() -> Duration {
    DEFAULT_TRANSIENT_RETRY_DELAY
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `harvest.toml` in the current directory is used when present.
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = Utf8PathBuf::from(DEFAULT_CONFIG_FILE);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        Self::parse(&text).into_app_err_with(|| format!("loading configuration file '{final_path}'"))
    }

    fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).into_app_err("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.min_review_hours.is_finite() || self.min_review_hours < 0.0 {
            return Err(app_err!("min_review_hours must be a non-negative number, got {}", self.min_review_hours));
        }

        if self.target_candidate_count == 0 {
            return Err(app_err!("target_candidate_count must be at least 1"));
        }

        if self.worker_pool_size == 0 {
            return Err(app_err!("worker_pool_size must be at least 1"));
        }

        if self.max_search_attempts == 0 {
            return Err(app_err!("max_search_attempts must be at least 1"));
        }

        if self.max_listing_pages == Some(0) {
            return Err(app_err!("max_listing_pages must be at least 1 when set"));
        }

        if self.search_query.trim().is_empty() {
            return Err(app_err!("search_query must not be empty"));
        }

        if self.output_path.as_str().is_empty() {
            return Err(app_err!("output_path must not be empty"));
        }

        if self.prior_outputs.contains(&self.output_path) {
            return Err(app_err!("output_path '{}' must not also be listed in prior_outputs", self.output_path));
        }

        if self.request_timeout.is_zero() {
            return Err(app_err!("request_timeout must be greater than zero"));
        }

        let _ = Url::parse(&self.api_url).into_app_err_with(|| format!("api_url '{}' is not a valid URL", self.api_url))?;

        Ok(())
    }

    /// Settings for a harvest run
    #[must_use]
    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            output_path: self.output_path.clone(),
            prior_outputs: self.prior_outputs.clone(),
            target_candidate_count: self.target_candidate_count,
            worker_pool_size: self.worker_pool_size,
            inter_candidate_delay: self.inter_candidate_delay,
            max_listing_pages: self.max_listing_pages,
            min_review_hours: self.min_review_hours,
            max_retries: self.max_retries,
            throttle: ThrottleSettings {
                inter_call_delay: self.inter_call_delay,
                low_watermark: self.low_watermark,
                reset_buffer: self.reset_buffer,
                hard_cooldown: self.hard_cooldown,
            },
            discovery: DiscoverySettings {
                search_query: self.search_query.clone(),
                min_items_per_candidate: self.min_items_per_candidate,
                max_search_attempts: self.max_search_attempts,
                search_retry_delay: self.search_retry_delay,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
