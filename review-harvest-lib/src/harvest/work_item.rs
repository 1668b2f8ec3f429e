use crate::remote::{RemoteState, WorkItemSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemState {
    Open,
    Closed,
    Merged,
}

/// A pull request as seen by the classifier.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub candidate_id: String,
    pub number: u64,
    pub state: WorkItemState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub review_count: usize,
}

impl WorkItem {
    #[must_use]
    pub fn from_summary(candidate_id: &str, summary: &WorkItemSummary, review_count: usize) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            number: summary.number,
            state: state_of(summary),
            created_at: summary.created_at,
            closed_at: summary.closed_at,
            review_count,
        }
    }

    /// Hours from creation to closure, if closed.
    #[must_use]
    pub fn review_hours(&self) -> Option<f64> {
        self.closed_at.map(|closed| elapsed_hours(self.created_at, closed))
    }
}

#[must_use]
pub fn state_of(summary: &WorkItemSummary) -> WorkItemState {
    match summary.state {
        RemoteState::Open => WorkItemState::Open,
        RemoteState::Closed if summary.merged_at.is_some() => WorkItemState::Merged,
        RemoteState::Closed => WorkItemState::Closed,
    }
}

#[expect(clippy::cast_precision_loss, reason = "millisecond precision is ample for review durations")]
pub(crate) fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
