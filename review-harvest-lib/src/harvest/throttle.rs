use super::LOG_TARGET;
use super::rate_budget::RateBudget;
use crate::remote::{ApiResult, Page, RateLimitInfo};
use chrono::Utc;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pacing knobs for the [`Throttle`].
#[derive(Debug, Clone, Copy)]
pub struct ThrottleSettings {
    /// Minimum spacing between the start of two consecutive remote calls.
    pub inter_call_delay: Duration,

    /// Below this many remaining calls the throttle waits for the quota window to reset.
    pub low_watermark: u32,

    /// Extra wait added after the reported reset time.
    pub reset_buffer: Duration,

    /// Fixed pause after the remote rejects a call for quota reasons.
    pub hard_cooldown: Duration,
}

/// Serializes every remote call through one shared [`RateBudget`].
///
/// Call [`Throttle::run`] around each remote call. It waits out any cooldown, waits for the
/// quota window to reset when the budget is low, enforces the inter-call spacing, performs
/// the call, and then records the quota snapshot the call reported.
///
/// Waiting happens while holding the budget lock, so concurrent callers queue up behind
/// one another and never start two calls closer together than the configured spacing.
#[derive(Debug)]
pub struct Throttle {
    budget: Mutex<RateBudget>,
    settings: ThrottleSettings,
}

impl Throttle {
    #[must_use]
    pub fn new(settings: ThrottleSettings) -> Arc<Self> {
        Arc::new(Self {
            budget: Mutex::new(RateBudget::new()),
            settings,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Wait until the next remote call may start.
    pub async fn acquire(&self) {
        let mut budget = self.budget.lock().await;

        let cooldown = budget.cooldown_wait(Instant::now());
        if !cooldown.is_zero() {
            log::warn!(target: LOG_TARGET, "Quota exhausted, cooling down for {}", humantime::format_duration(cooldown));
            tokio::time::sleep(cooldown).await;
        }
        budget.end_cooldown();

        if let Some(wait) = budget.reset_wait(Utc::now(), self.settings.low_watermark, self.settings.reset_buffer) {
            if !wait.is_zero() {
                log::warn!(
                    target: LOG_TARGET,
                    "Only {} calls left in the quota window, waiting {:.1} minutes for it to reset",
                    budget.remaining().unwrap_or_default(),
                    wait.as_secs_f64() / 60.0
                );
                tokio::time::sleep(wait).await;
            }
            budget.replenish();
        }

        let spacing = budget.spacing_wait(Instant::now(), self.settings.inter_call_delay);
        if !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }

        budget.mark_call(Instant::now());
    }

    /// Record a quota snapshot reported by the remote.
    pub async fn observe(&self, info: Option<RateLimitInfo>) {
        if let Some(info) = info {
            log::trace!(target: LOG_TARGET, "Quota: {} calls left, resets at {}", info.remaining, info.reset_at);
            self.budget.lock().await.observe(info);
        }
    }

    /// Seed the budget from an explicit quota query, typically once at startup.
    pub async fn prime(&self, info: RateLimitInfo) {
        log::info!(target: LOG_TARGET, "Starting with {} calls left in the quota window (resets at {})", info.remaining, info.reset_at);
        self.budget.lock().await.observe(info);
    }

    /// Enter the hard cooldown after the remote rejected a call for quota reasons.
    ///
    /// The next [`acquire`](Self::acquire) blocks until the cooldown elapses. The rejection
    /// is also remembered, see [`hard_limits`](Self::hard_limits).
    pub async fn note_hard_limit(&self) {
        log::warn!(
            target: LOG_TARGET,
            "Remote rejected a call for quota reasons, pausing all calls for {}",
            humantime::format_duration(self.settings.hard_cooldown)
        );
        self.budget.lock().await.start_cooldown(Instant::now(), self.settings.hard_cooldown);
    }

    /// Number of hard quota rejections seen since this throttle was created.
    pub async fn hard_limits(&self) -> u32 {
        self.budget.lock().await.hard_limits()
    }

    /// Whether any hard quota rejection was seen since this throttle was created.
    pub async fn hard_limit_hit(&self) -> bool {
        self.hard_limits().await > 0
    }

    /// Perform one throttled remote call.
    pub async fn run<T, F, Fut>(&self, call: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.acquire().await;
        let result = call().await;
        self.observe(result.rate_limit()).await;
        result
    }

    /// Walk a paginated listing, one throttled call per page.
    ///
    /// Stops at the first non-success result and returns it, discarding the pages already
    /// fetched. When `max_pages` is set, stops after that many pages even if more exist.
    pub async fn collect_pages<T, F, Fut>(&self, mut fetch: F, max_pages: Option<u32>) -> ApiResult<Vec<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut page = 1;
        let mut last_info = None;

        loop {
            match self.run(|| fetch(page)).await {
                ApiResult::Success(batch, info) => {
                    last_info = info.or(last_info);
                    let has_next = batch.has_next && !batch.items.is_empty();
                    items.extend(batch.items);

                    if !has_next {
                        break;
                    }

                    if max_pages.is_some_and(|max| page >= max) {
                        log::debug!(target: LOG_TARGET, "Stopping after {page} pages, more are available");
                        break;
                    }

                    page += 1;
                }
                ApiResult::RateLimited(info) => return ApiResult::RateLimited(info),
                ApiResult::NotFound(info) => return ApiResult::NotFound(info),
                ApiResult::Failed(e, info) => return ApiResult::Failed(e, info),
            }
        }

        ApiResult::Success(items, last_info)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::DateTime;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> ThrottleSettings {
        ThrottleSettings {
            inter_call_delay: Duration::from_secs(15),
            low_watermark: 100,
            reset_buffer: Duration::from_secs(10),
            hard_cooldown: Duration::from_secs(3600),
        }
    }

    fn quota(remaining: u32, reset_in: i64) -> RateLimitInfo {
        RateLimitInfo {
            remaining,
            reset_at: Utc::now() + chrono::Duration::seconds(reset_in),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let throttle = Throttle::new(settings());
        let start = Instant::now();
        throttle.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_are_spaced() {
        let throttle = Throttle::new(settings());

        let mut starts = Vec::new();
        for _ in 0..4 {
            throttle.acquire().await;
            starts.push(Instant::now());
        }

        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let throttle = Throttle::new(settings());
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let starts = Arc::clone(&starts);
                tokio::spawn(async move {
                    throttle.acquire().await;
                    starts.lock().unwrap().push(Instant::now());
                })
            })
            .collect();

        for task in futures_util::future::join_all(tasks).await {
            task.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 5);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_budget_waits_for_reset() {
        let throttle = Throttle::new(settings());
        throttle.observe(Some(quota(5, 120))).await;

        let start = Instant::now();
        throttle.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_budget_does_not_wait_for_reset() {
        let throttle = Throttle::new(settings());
        throttle.observe(Some(quota(4000, 3000))).await;

        let start = Instant::now();
        throttle.acquire().await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_limit_cools_down() {
        let throttle = Throttle::new(settings());
        assert!(!throttle.hard_limit_hit().await);

        throttle.note_hard_limit().await;
        assert!(throttle.hard_limit_hit().await);

        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(3600));

        // The rejection is remembered after the cooldown ends
        assert_eq!(throttle.hard_limits().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_observes_quota() {
        let throttle = Throttle::new(settings());

        let result = throttle
            .run(|| async { ApiResult::Success(7, Some(quota(3, 60))) })
            .await;
        assert!(matches!(result, ApiResult::Success(7, _)));

        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_pages_follows_has_next() {
        let throttle = Throttle::new(settings());
        let calls = AtomicU32::new(0);

        let result = throttle
            .collect_pages(
                |page| {
                    let _ = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        ApiResult::Success(
                            Page {
                                items: vec![page * 10, page * 10 + 1],
                                has_next: page < 3,
                            },
                            None,
                        )
                    }
                },
                None,
            )
            .await;

        let ApiResult::Success(items, _) = result else {
            panic!("expected success");
        };
        assert_eq!(items, vec![10, 11, 20, 21, 30, 31]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_pages_honors_max_pages() {
        let throttle = Throttle::new(settings());

        let result = throttle
            .collect_pages(
                |page| async move {
                    ApiResult::Success(
                        Page {
                            items: vec![page],
                            has_next: true,
                        },
                        None,
                    )
                },
                Some(2),
            )
            .await;

        let ApiResult::Success(items, _) = result else {
            panic!("expected success");
        };
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_pages_stops_on_rate_limit() {
        let throttle = Throttle::new(settings());
        let reset_at = DateTime::from_timestamp(2_000_000_000, 0).unwrap();

        let result = throttle
            .collect_pages(
                |page| async move {
                    if page == 1 {
                        ApiResult::Success(
                            Page {
                                items: vec![1_u32],
                                has_next: true,
                            },
                            None,
                        )
                    } else {
                        ApiResult::RateLimited(Some(RateLimitInfo { remaining: 0, reset_at }))
                    }
                },
                None,
            )
            .await;

        assert!(result.is_rate_limited());
    }
}
