use super::LOG_TARGET;
use super::classifier::is_human_reviewed;
use super::metrics_record::MetricsRecord;
use super::retry_policy::RetryPolicy;
use super::throttle::Throttle;
use super::work_item::WorkItem;
use crate::remote::{ApiResult, RemoteApi, RemoteState, WorkItemSummary};
use std::sync::Arc;

/// Upper bound on review or comment pages fetched for one pull request.
const MAX_ACTIVITY_PAGES: u32 = 30;

enum Attempt {
    Record(MetricsRecord),
    NotReviewed,
    QuotaExhausted,
    Failed(ohno::AppError),
}

macro_rules! fetched {
    ($result:expr) => {
        match $result {
            ApiResult::Success(value, _) => value,
            ApiResult::RateLimited(_) => return Attempt::QuotaExhausted,
            ApiResult::NotFound(_) => return Attempt::Failed(ohno::app_err!("not found")),
            ApiResult::Failed(e, _) => return Attempt::Failed(e),
        }
    };
}

/// Turns one pull request summary into a [`MetricsRecord`], or nothing.
///
/// Every outcome other than a complete record of a human-reviewed pull request is
/// reported as `None` and logged; this type never fails.
#[derive(Debug)]
pub struct DetailFetcher<A> {
    api: Arc<A>,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,
    min_review_hours: f64,
}

impl<A: RemoteApi> DetailFetcher<A> {
    #[must_use]
    pub const fn new(api: Arc<A>, throttle: Arc<Throttle>, retry: RetryPolicy, min_review_hours: f64) -> Self {
        Self {
            api,
            throttle,
            retry,
            min_review_hours,
        }
    }

    /// Fetch reviews, detail, and comments for one pull request and build its record.
    ///
    /// Open pull requests are dropped without any remote call. When the remote rejects a
    /// call for quota reasons and the retry policy allows another attempt, the throttle
    /// enters its hard cooldown and the whole fetch is redone. The final rejection only
    /// drops the pull request.
    pub async fn fetch_one(&self, candidate_id: &str, summary: &WorkItemSummary) -> Option<MetricsRecord> {
        if summary.state == RemoteState::Open {
            return None;
        }

        for attempt in self.retry.attempts() {
            match self.attempt(candidate_id, summary).await {
                Attempt::Record(record) => return Some(record),
                Attempt::NotReviewed => return None,
                Attempt::Failed(e) => {
                    log::warn!(target: LOG_TARGET, "Skipping {candidate_id}#{}: {e:#}", summary.number);
                    return None;
                }
                Attempt::QuotaExhausted if self.retry.should_retry(attempt) => {
                    self.throttle.note_hard_limit().await;
                    log::info!(
                        target: LOG_TARGET,
                        "Retrying {candidate_id}#{} after quota exhaustion (retry {attempt}/{})",
                        summary.number,
                        self.retry.max_retries()
                    );
                }
                Attempt::QuotaExhausted => break,
            }
        }

        log::warn!(
            target: LOG_TARGET,
            "Dropping {candidate_id}#{} after {} quota rejections",
            summary.number,
            self.retry.max_retries() + 1
        );
        None
    }

    async fn attempt(&self, candidate_id: &str, summary: &WorkItemSummary) -> Attempt {
        let api = &*self.api;
        let number = summary.number;

        let reviews = fetched!(
            self.throttle
                .collect_pages(|page| api.list_reviews(candidate_id, number, page), Some(MAX_ACTIVITY_PAGES))
                .await
        );

        let item = WorkItem::from_summary(candidate_id, summary, reviews.len());
        if !is_human_reviewed(&item, self.min_review_hours) {
            log::trace!(target: LOG_TARGET, "{candidate_id}#{number} shows no human review");
            return Attempt::NotReviewed;
        }

        let detail = fetched!(self.throttle.run(|| api.get_work_item(candidate_id, number)).await);

        let comments = fetched!(
            self.throttle
                .collect_pages(|page| api.list_comments(candidate_id, number, page), Some(MAX_ACTIVITY_PAGES))
                .await
        );

        match MetricsRecord::assemble(candidate_id, summary, &detail, &reviews, &comments) {
            Some(record) => Attempt::Record(record),
            None => Attempt::Failed(ohno::app_err!("incomplete pull request data")),
        }
    }
}
