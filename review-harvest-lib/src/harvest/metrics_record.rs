use super::work_item::{WorkItemState, elapsed_hours, state_of};
use crate::HashSet;
use crate::remote::{Comment, Review, ReviewState, WorkItemDetail, WorkItemSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one pull request across runs and output files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub repo: String,
    pub pr_number: u64,
}

impl RecordKey {
    #[must_use]
    pub fn new(repo: impl Into<String>, pr_number: u64) -> Self {
        Self {
            repo: repo.into(),
            pr_number,
        }
    }
}

/// One output row describing a human-reviewed pull request.
///
/// Field order is the column order of the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub repo: String,
    pub pr_number: u64,
    pub state: WorkItemState,
    pub title_length: usize,
    pub description_length: usize,
    pub description_code_blocks: usize,
    #[serde(default)]
    pub author: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub closed_at: DateTime<Utc>,
    #[serde(deserialize_with = "flag::deserialize")]
    pub is_merged: bool,
    pub review_hours: f64,
    pub comments: usize,
    pub review_comments: usize,
    pub unique_participants: usize,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub changes_size: u64,
    pub review_count: usize,
    pub approval_count: usize,
    pub request_changes_count: usize,
}

impl MetricsRecord {
    /// Build a record from everything fetched for one pull request.
    ///
    /// Returns `None` when the pull request never closed, since such a record would
    /// have no review duration.
    #[must_use]
    pub fn assemble(
        candidate_id: &str,
        summary: &WorkItemSummary,
        detail: &WorkItemDetail,
        reviews: &[Review],
        comments: &[Comment],
    ) -> Option<Self> {
        let closed_at = summary.closed_at.or(summary.merged_at)?;
        let body = summary.body.as_deref().unwrap_or_default();

        let participants: HashSet<&str> = comments
            .iter()
            .filter_map(|c| c.user.as_ref())
            .chain(reviews.iter().filter_map(|r| r.user.as_ref()))
            .map(|u| u.login.as_str())
            .collect();

        Some(Self {
            repo: candidate_id.to_string(),
            pr_number: summary.number,
            state: state_of(summary),
            title_length: summary.title.chars().count(),
            description_length: body.chars().count(),
            description_code_blocks: body.matches("```").count() / 2,
            author: summary.user.as_ref().map(|u| u.login.clone()).unwrap_or_default(),
            created_at: summary.created_at,
            closed_at,
            is_merged: detail.merged || summary.merged_at.is_some(),
            review_hours: elapsed_hours(summary.created_at, closed_at),
            comments: comments.len(),
            review_comments: reviews.len(),
            unique_participants: participants.len(),
            additions: detail.additions,
            deletions: detail.deletions,
            changed_files: detail.changed_files,
            changes_size: detail.additions + detail.deletions,
            review_count: reviews.len(),
            approval_count: count_state(reviews, ReviewState::Approved),
            request_changes_count: count_state(reviews, ReviewState::ChangesRequested),
        })
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.repo.clone(), self.pr_number)
    }
}

fn count_state(reviews: &[Review], state: ReviewState) -> usize {
    reviews.iter().filter(|r| r.state == state).count()
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, with RFC 3339 accepted on input.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;

        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, FORMAT) {
            return Ok(naive.and_utc());
        }

        DateTime::parse_from_rfc3339(&s)
            .or_else(|_| DateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%:z"))
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{s}': {e}")))
    }
}

/// Booleans as written by this tool (`true`) or by spreadsheet tooling (`True`, `1`).
mod flag {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid boolean '{other}'"))),
        }
    }
}
