//! Wire models for the fields the harvester consumes
//!
//! Only the handful of fields used downstream are modeled; everything else in the
//! remote payloads is ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

#[cfg(test)]
impl<T> Page<T> {
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self { items, has_next: false }
    }
}

/// A repository returned by the popularity search
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CandidateHit {
    #[serde(rename = "full_name")]
    pub id: String,
    #[serde(rename = "stargazers_count", default)]
    pub stars: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    pub items: Vec<CandidateHit>,
}

/// Account attached to a pull request, review, or comment
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct User {
    pub login: String,
}

/// Remote state of a pull request; merged PRs report `closed` with `merged_at` set
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Open,
    Closed,
}

/// A pull request as returned by the listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemSummary {
    pub number: u64,
    pub state: RemoteState,
    #[serde(default)]
    pub title: String,
    pub body: Option<String>,
    pub user: Option<User>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// The change-size fields only present on the single pull request endpoint
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct WorkItemDetail {
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
}

/// Verdict of a submitted review
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub user: Option<User>,
    pub state: ReviewState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitResources {
    pub core: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitBucket {
    pub remaining: u32,
    pub reset: i64,
}
