//! The remote API seam
//!
//! The harvest pipeline talks to the remote source exclusively through [`RemoteApi`],
//! one page or one resource per call, so that every call can be individually throttled
//! and every quota rejection is visible to the caller as [`ApiResult::RateLimited`].
//!
//! [`GitHubApi`] is the production implementation over the GitHub REST API.

mod client;
mod github;
mod models;

pub use client::{ApiResult, Client, DEFAULT_TRANSIENT_RETRIES, DEFAULT_TRANSIENT_RETRY_DELAY, Fetched, RateLimitInfo};
pub use github::GitHubApi;
pub use models::{CandidateHit, Comment, Page, RemoteState, Review, ReviewState, User, WorkItemDetail, WorkItemSummary};

const LOG_TARGET: &str = "    remote";

/// Read-only operations the harvester needs from the remote source.
///
/// Pages are 1-based. Implementations perform exactly one remote call per method
/// invocation and never retry on their own: retry and pacing belong to the caller.
pub trait RemoteApi: Send + Sync {
    /// Search candidates in descending popularity.
    fn search_candidates(&self, query: &str, page: u32) -> impl Future<Output = ApiResult<Page<CandidateHit>>> + Send;

    /// Count all work items (any state) of a candidate.
    fn count_work_items(&self, candidate_id: &str) -> impl Future<Output = ApiResult<u64>> + Send;

    /// List work items of a candidate, any state, newest first.
    fn list_work_items(&self, candidate_id: &str, page: u32) -> impl Future<Output = ApiResult<Page<WorkItemSummary>>> + Send;

    /// Fetch the change-size fields of a single work item.
    fn get_work_item(&self, candidate_id: &str, number: u64) -> impl Future<Output = ApiResult<WorkItemDetail>> + Send;

    fn list_reviews(&self, candidate_id: &str, number: u64, page: u32) -> impl Future<Output = ApiResult<Page<Review>>> + Send;

    fn list_comments(&self, candidate_id: &str, number: u64, page: u32) -> impl Future<Output = ApiResult<Page<Comment>>> + Send;

    /// Current quota snapshot.
    fn rate_status(&self) -> impl Future<Output = ApiResult<RateLimitInfo>> + Send;
}
