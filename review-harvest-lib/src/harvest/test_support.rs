//! In-memory [`RemoteApi`] used by the harvest unit tests.

use crate::remote::{
    ApiResult, CandidateHit, Comment, Page, RateLimitInfo, RemoteApi, RemoteState, Review, ReviewState, User, WorkItemDetail,
    WorkItemSummary,
};
use crate::{HashMap, HashSet};
use chrono::{DateTime, Duration, Utc};
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub type ItemKey = (String, u64);

#[derive(Debug, Default)]
pub struct FakeApi {
    pub hits: Vec<CandidateHit>,
    pub search_page_size: usize,
    pub counts: HashMap<String, u64>,
    pub items: HashMap<String, Vec<WorkItemSummary>>,
    pub details: HashMap<ItemKey, WorkItemDetail>,
    pub reviews: HashMap<ItemKey, Vec<Review>>,
    pub comments: HashMap<ItemKey, Vec<Comment>>,

    /// `get_work_item` fails for these.
    pub broken_items: HashSet<ItemKey>,

    /// `list_work_items` fails for these candidates.
    pub broken_listings: HashSet<String>,

    /// Number of quota rejections `list_reviews` returns before succeeding, per item.
    pub review_rejections: Mutex<HashMap<ItemKey, u32>>,

    /// Number of quota rejections `list_work_items` returns before succeeding, per candidate.
    pub listing_rejections: Mutex<HashMap<String, u32>>,

    /// Number of failures `search_candidates` returns before succeeding.
    pub search_failures: AtomicU32,

    /// `search_candidates` is rejected for quota reasons.
    pub search_rate_limited: bool,

    pub calls: Mutex<Vec<String>>,
}

pub fn created() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn quota() -> RateLimitInfo {
    RateLimitInfo {
        remaining: 4000,
        reset_at: Utc::now() + Duration::hours(1),
    }
}

pub fn exhausted() -> RateLimitInfo {
    RateLimitInfo {
        remaining: 0,
        reset_at: Utc::now() - Duration::seconds(1),
    }
}

pub fn closed_pr(number: u64, open_minutes: i64, merged: bool) -> WorkItemSummary {
    let closed_at = created() + Duration::minutes(open_minutes);
    WorkItemSummary {
        number,
        state: RemoteState::Closed,
        title: format!("Change {number}"),
        body: Some("Details".into()),
        user: Some(User { login: "author".into() }),
        created_at: created(),
        closed_at: Some(closed_at),
        merged_at: merged.then_some(closed_at),
    }
}

pub fn open_pr(number: u64) -> WorkItemSummary {
    WorkItemSummary {
        number,
        state: RemoteState::Open,
        title: format!("Change {number}"),
        body: None,
        user: None,
        created_at: created(),
        closed_at: None,
        merged_at: None,
    }
}

pub fn review(login: &str, state: ReviewState) -> Review {
    Review {
        user: Some(User { login: login.into() }),
        state,
    }
}

pub fn comment(login: &str) -> Comment {
    Comment {
        user: Some(User { login: login.into() }),
    }
}

fn key(candidate_id: &str, number: u64) -> ItemKey {
    (candidate_id.to_string(), number)
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            search_page_size: 2,
            ..Self::default()
        }
    }

    /// Add a searchable candidate with the given pull requests, each reviewed once.
    pub fn with_candidate(mut self, id: &str, prs: Vec<WorkItemSummary>) -> Self {
        self.hits.push(CandidateHit {
            id: id.to_string(),
            stars: 1000 - self.hits.len() as u64,
        });
        let _ = self.counts.insert(id.to_string(), prs.len() as u64);
        for pr in &prs {
            let _ = self.reviews.insert(key(id, pr.number), vec![review("reviewer", ReviewState::Approved)]);
            let _ = self.comments.insert(key(id, pr.number), vec![comment("reviewer"), comment("other")]);
            let _ = self.details.insert(
                key(id, pr.number),
                WorkItemDetail {
                    merged: pr.merged_at.is_some(),
                    additions: 10,
                    deletions: 2,
                    changed_files: 1,
                },
            );
        }
        let _ = self.items.insert(id.to_string(), prs);
        self
    }

    pub fn with_count(mut self, id: &str, count: u64) -> Self {
        let _ = self.counts.insert(id.to_string(), count);
        self
    }

    pub fn with_reviews(mut self, id: &str, number: u64, reviews: Vec<Review>) -> Self {
        let _ = self.reviews.insert(key(id, number), reviews);
        self
    }

    pub fn with_broken_item(mut self, id: &str, number: u64) -> Self {
        let _ = self.broken_items.insert(key(id, number));
        self
    }

    pub fn with_review_rejections(self, id: &str, number: u64, times: u32) -> Self {
        let _ = self.review_rejections.lock().unwrap().insert(key(id, number), times);
        self
    }

    pub fn with_listing_rejections(self, id: &str, times: u32) -> Self {
        let _ = self.listing_rejections.lock().unwrap().insert(id.to_string(), times);
        self
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn take_rejection<K: Eq + core::hash::Hash>(map: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
    let mut map = map.lock().unwrap();
    match map.get_mut(key) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

impl RemoteApi for FakeApi {
    async fn search_candidates(&self, query: &str, page: u32) -> ApiResult<Page<CandidateHit>> {
        self.record(format!("search {query} {page}"));

        if self.search_rate_limited {
            return ApiResult::RateLimited(Some(exhausted()));
        }

        if self
            .search_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return ApiResult::Failed(ohno::app_err!("search unavailable"), Some(quota()));
        }

        let start = (page as usize - 1) * self.search_page_size;
        let items: Vec<_> = self.hits.iter().skip(start).take(self.search_page_size).cloned().collect();
        let has_next = start + self.search_page_size < self.hits.len();
        ApiResult::Success(Page { items, has_next }, Some(quota()))
    }

    async fn count_work_items(&self, candidate_id: &str) -> ApiResult<u64> {
        self.record(format!("count {candidate_id}"));
        match self.counts.get(candidate_id) {
            Some(count) => ApiResult::Success(*count, Some(quota())),
            None => ApiResult::NotFound(Some(quota())),
        }
    }

    async fn list_work_items(&self, candidate_id: &str, page: u32) -> ApiResult<Page<WorkItemSummary>> {
        self.record(format!("list {candidate_id} {page}"));

        if take_rejection(&self.listing_rejections, &candidate_id.to_string()) {
            return ApiResult::RateLimited(Some(exhausted()));
        }

        if self.broken_listings.contains(candidate_id) {
            return ApiResult::Failed(ohno::app_err!("listing broke"), Some(quota()));
        }

        let items = self.items.get(candidate_id).cloned().unwrap_or_default();
        ApiResult::Success(Page::last(items), Some(quota()))
    }

    async fn get_work_item(&self, candidate_id: &str, number: u64) -> ApiResult<WorkItemDetail> {
        self.record(format!("get {candidate_id} {number}"));

        let key = key(candidate_id, number);
        if self.broken_items.contains(&key) {
            return ApiResult::Failed(ohno::app_err!("detail broke"), Some(quota()));
        }

        match self.details.get(&key) {
            Some(detail) => ApiResult::Success(*detail, Some(quota())),
            None => ApiResult::NotFound(Some(quota())),
        }
    }

    async fn list_reviews(&self, candidate_id: &str, number: u64, page: u32) -> ApiResult<Page<Review>> {
        self.record(format!("reviews {candidate_id} {number} {page}"));

        let key = key(candidate_id, number);
        if take_rejection(&self.review_rejections, &key) {
            return ApiResult::RateLimited(Some(exhausted()));
        }

        let reviews = self.reviews.get(&key).cloned().unwrap_or_default();
        ApiResult::Success(Page::last(reviews), Some(quota()))
    }

    async fn list_comments(&self, candidate_id: &str, number: u64, page: u32) -> ApiResult<Page<Comment>> {
        self.record(format!("comments {candidate_id} {number} {page}"));

        let comments = self.comments.get(&key(candidate_id, number)).cloned().unwrap_or_default();
        ApiResult::Success(Page::last(comments), Some(quota()))
    }

    async fn rate_status(&self) -> ApiResult<RateLimitInfo> {
        self.record("rate".to_string());
        ApiResult::Success(quota(), None)
    }
}
