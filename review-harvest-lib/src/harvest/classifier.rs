use super::work_item::{WorkItem, WorkItemState};

/// Decide whether a pull request carries evidence of human review.
///
/// A pull request qualifies when it is closed or merged, has at least one submitted
/// review, and stayed open strictly longer than `min_review_hours`. Anything closed
/// faster is treated as automated or rubber-stamped.
#[must_use]
pub fn is_human_reviewed(item: &WorkItem, min_review_hours: f64) -> bool {
    if item.state == WorkItemState::Open || item.review_count == 0 {
        return false;
    }

    item.review_hours().is_some_and(|hours| hours > min_review_hours)
}
