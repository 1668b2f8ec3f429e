//! The rate-budgeted, resumable collection pipeline
//!
//! A harvest run discovers popular repositories, walks their pull requests, keeps the
//! ones that show evidence of human review, and appends one [`MetricsRecord`] per kept
//! pull request to a CSV output file.
//!
//! # Implementation Model
//!
//! Every remote call goes through a single [`Throttle`], which owns the shared
//! [`RateBudget`]. It spaces calls apart, waits for the quota window to reset when the
//! budget runs low, and imposes a fixed cooldown after the remote rejects a call for
//! quota reasons.
//!
//! The [`Orchestrator`] is a small state machine:
//!
//! - **Discovering**: the [`Discoverer`] searches for repositories not already present in
//!   the [`CheckpointStore`] until the configured target is reached.
//! - **Processing a candidate**: the candidate's pull requests are listed, then fetched
//!   by a bounded pool of concurrent [`DetailFetcher`] workers. Each worker classifies
//!   its pull request with [`is_human_reviewed`] and retries quota rejections according
//!   to its [`RetryPolicy`].
//! - **Persisting**: the candidate's records are merged into the output file, which is
//!   rewritten atomically, before the next candidate starts.
//!
//! The output file doubles as the checkpoint. Re-running with the same output skips every
//! repository already present, and merging deduplicates by `(repo, pr_number)`, so
//! interrupted and repeated runs never duplicate rows.

mod checkpoint;
mod classifier;
mod detail_fetcher;
mod discoverer;
mod metrics_record;
mod orchestrator;
mod output_lock;
mod progress;
mod rate_budget;
mod retry_policy;
#[cfg(test)]
mod test_support;
mod throttle;
mod work_item;

pub use checkpoint::{CheckpointStore, MergeOutcome};
pub use classifier::is_human_reviewed;
pub use detail_fetcher::DetailFetcher;
pub use discoverer::{Candidate, Discoverer, Discovery, DiscoverySettings, DiscoveryStatus};
pub use metrics_record::{MetricsRecord, RecordKey};
pub use orchestrator::{HarvestSettings, Orchestrator, RunSummary};
pub use output_lock::{OutputLockGuard, acquire_output_lock};
pub use progress::Progress;
pub use rate_budget::RateBudget;
pub use retry_policy::RetryPolicy;
pub use throttle::{Throttle, ThrottleSettings};
pub use work_item::{WorkItem, WorkItemState};

/// Log target for the harvest pipeline
const LOG_TARGET: &str = "   harvest";
