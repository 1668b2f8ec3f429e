use super::LOG_TARGET;
use super::checkpoint::CheckpointStore;
use super::detail_fetcher::DetailFetcher;
use super::discoverer::{Candidate, Discoverer, DiscoverySettings, DiscoveryStatus};
use super::metrics_record::{MetricsRecord, RecordKey};
use super::output_lock::{OutputLockGuard, acquire_output_lock};
use super::progress::Progress;
use super::retry_policy::RetryPolicy;
use super::throttle::{Throttle, ThrottleSettings};
use crate::Result;
use crate::remote::{ApiResult, RemoteApi, WorkItemSummary};
use camino::Utf8PathBuf;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use futures_util::{StreamExt, future, stream};
use ohno::bail;
use std::sync::Arc;

/// Listing a candidate's pull requests is attempted this many times when the quota runs out.
const LISTING_ATTEMPTS: u32 = 2;

/// Everything a harvest run needs to know.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub output_path: Utf8PathBuf,
    pub prior_outputs: Vec<Utf8PathBuf>,
    pub target_candidate_count: usize,
    pub worker_pool_size: usize,
    pub inter_candidate_delay: Duration,
    pub max_listing_pages: Option<u32>,
    pub min_review_hours: f64,
    pub max_retries: u32,
    pub throttle: ThrottleSettings,
    pub discovery: DiscoverySettings,
}

/// What a harvest run accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub discovery: DiscoveryStatus,
    pub candidates_discovered: usize,
    pub candidates_processed: usize,
    pub records_added: usize,
    pub total_rows: usize,

    /// The run stopped early because the remote rejected calls for quota reasons.
    pub stopped_by_quota: bool,
}

enum Phase {
    Discovering,
    ProcessingCandidate(usize),
    Persisting(usize, Vec<MetricsRecord>),
    Done,
}

/// Drives a harvest run from candidate discovery to the final flush.
///
/// Candidates are processed one at a time. Within a candidate, pull requests are fetched
/// by a bounded pool of concurrent workers that share one [`Throttle`]. Each candidate's
/// records are merged into the output file before the next candidate starts, so an
/// interrupted run loses at most the candidate in flight.
pub struct Orchestrator<A> {
    api: Arc<A>,
    throttle: Arc<Throttle>,
    discoverer: Discoverer<A>,
    fetcher: DetailFetcher<A>,
    store: CheckpointStore,
    settings: HarvestSettings,
    progress: Arc<dyn Progress>,
    _output_lock: OutputLockGuard,
}

impl<A: core::fmt::Debug> core::fmt::Debug for Orchestrator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("api", &self.api)
            .field("throttle", &self.throttle)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("progress", &"<dyn Progress>")
            .finish_non_exhaustive()
    }
}

impl<A: RemoteApi> Orchestrator<A> {
    /// Lock the output file and load the checkpoint.
    pub async fn new(api: Arc<A>, settings: HarvestSettings, progress: Arc<dyn Progress>) -> Result<Self> {
        progress.set_phase("Preparing");

        let output_lock = acquire_output_lock(&settings.output_path).await?;
        let store = CheckpointStore::open(settings.output_path.clone(), &settings.prior_outputs)?;
        let throttle = Throttle::new(settings.throttle);

        Ok(Self {
            discoverer: Discoverer::new(Arc::clone(&api), Arc::clone(&throttle), settings.discovery.clone()),
            fetcher: DetailFetcher::new(
                Arc::clone(&api),
                Arc::clone(&throttle),
                RetryPolicy::new(settings.max_retries),
                settings.min_review_hours,
            ),
            api,
            throttle,
            store,
            settings,
            progress,
            _output_lock: output_lock,
        })
    }

    /// Run the harvest to completion.
    pub async fn run(mut self) -> Result<RunSummary> {
        let result = self.drive().await;
        self.progress.done();
        result
    }

    async fn drive(&mut self) -> Result<RunSummary> {
        self.prime().await;

        let mut summary = RunSummary {
            discovery: DiscoveryStatus::Complete,
            candidates_discovered: 0,
            candidates_processed: 0,
            records_added: 0,
            total_rows: self.store.total_rows(),
            stopped_by_quota: false,
        };

        let mut candidates = Vec::new();
        let mut hard_limits_before = 0;
        let mut phase = Phase::Discovering;

        loop {
            phase = match phase {
                Phase::Discovering => {
                    candidates = self.discover(&mut summary).await?;
                    hard_limits_before = self.throttle.hard_limits().await;

                    if candidates.is_empty() {
                        Phase::Done
                    } else {
                        Phase::ProcessingCandidate(0)
                    }
                }

                Phase::ProcessingCandidate(index) => {
                    let records = self.process_candidate(&candidates[index], index, candidates.len()).await;
                    Phase::Persisting(index, records)
                }

                Phase::Persisting(index, records) => {
                    let candidate = &candidates[index];
                    let outcome = self.store.merge_and_persist(records)?;
                    summary.candidates_processed += 1;
                    summary.records_added += outcome.added;

                    self.progress.println(&format!(
                        "{:>12} {} ({} new records, {} total)",
                        "Harvested", candidate.id, outcome.added, outcome.total_rows
                    ));

                    if index + 1 >= candidates.len() {
                        Phase::Done
                    } else if self.throttle.hard_limits().await > hard_limits_before {
                        log::warn!(
                            target: LOG_TARGET,
                            "Stopping after {} of {} repositories because the quota ran out",
                            index + 1,
                            candidates.len()
                        );
                        summary.stopped_by_quota = true;
                        Phase::Done
                    } else {
                        self.progress.set_phase("Waiting");
                        tokio::time::sleep(self.settings.inter_candidate_delay).await;
                        Phase::ProcessingCandidate(index + 1)
                    }
                }

                Phase::Done => break,
            };
        }

        summary.total_rows = self.store.flush()?.total_rows;
        Ok(summary)
    }

    async fn prime(&self) {
        let api = &*self.api;
        match self.throttle.run(|| api.rate_status()).await {
            ApiResult::Success(info, _) => self.throttle.prime(info).await,
            ApiResult::RateLimited(Some(info)) => self.throttle.prime(info).await,
            ApiResult::RateLimited(None) => log::debug!(target: LOG_TARGET, "Quota status was rejected without a snapshot"),
            ApiResult::NotFound(_) => log::debug!(target: LOG_TARGET, "Quota status is not available"),
            ApiResult::Failed(e, _) => log::warn!(target: LOG_TARGET, "Could not read quota status: {e:#}"),
        }
    }

    async fn discover(&self, summary: &mut RunSummary) -> Result<Vec<Candidate>> {
        self.progress.set_phase("Discovering");
        self.progress.set_indeterminate(Box::new(|| "searching for repositories".to_string()));

        let known = self.store.known_candidates();
        let wanted = self.settings.target_candidate_count.saturating_sub(known.len());
        log::info!(
            target: LOG_TARGET,
            "{} repositories already harvested, looking for {wanted} more",
            known.len()
        );

        let discovery = self.discoverer.discover(wanted, known).await;
        summary.discovery = discovery.status;
        summary.candidates_discovered = discovery.candidates.len();

        if discovery.status == DiscoveryStatus::Failed && discovery.candidates.is_empty() {
            bail!(
                "repository search failed {} times in a row",
                self.settings.discovery.max_search_attempts.max(1)
            );
        }

        log::info!(
            target: LOG_TARGET,
            "Found {} new repositories to harvest ({})",
            discovery.candidates.len(),
            discovery.status
        );

        Ok(discovery.candidates)
    }

    async fn process_candidate(&self, candidate: &Candidate, index: usize, count: usize) -> Vec<MetricsRecord> {
        log::info!(target: LOG_TARGET, "Harvesting repository {}/{count}: {candidate}", index + 1);

        self.progress.set_phase("Listing");
        let id = candidate.id.clone();
        self.progress
            .set_indeterminate(Box::new(move || format!("pull requests of {id}")));

        let Some(mut items) = self.list_items(candidate).await else {
            return Vec::new();
        };

        let listed = items.len();
        items.retain(|item| !self.store.contains(&RecordKey::new(candidate.id.as_str(), item.number)));
        if items.len() < listed {
            log::info!(
                target: LOG_TARGET,
                "Skipping {} pull requests of {} that were already harvested",
                listed - items.len(),
                candidate.id
            );
        }

        let total = items.len() as u64;
        let processed = Arc::new(AtomicU64::new(0));
        let kept = Arc::new(AtomicU64::new(0));

        self.progress.set_phase("Harvesting");
        {
            let processed = Arc::clone(&processed);
            let kept = Arc::clone(&kept);
            let id = candidate.id.clone();
            self.progress.set_determinate(Box::new(move || {
                (
                    total,
                    processed.load(Ordering::Relaxed),
                    format!("{id}: {} reviewed pull requests", kept.load(Ordering::Relaxed)),
                )
            }));
        }

        let records: Vec<MetricsRecord> = stream::iter(&items)
            .map(|summary| {
                let processed = Arc::clone(&processed);
                let kept = Arc::clone(&kept);
                async move {
                    let record = self.fetcher.fetch_one(&candidate.id, summary).await;
                    let _ = processed.fetch_add(1, Ordering::Relaxed);
                    if record.is_some() {
                        let _ = kept.fetch_add(1, Ordering::Relaxed);
                    }
                    record
                }
            })
            .buffered(self.settings.worker_pool_size.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        log::info!(
            target: LOG_TARGET,
            "Finished {}: {} of {} pull requests were human-reviewed",
            candidate.id,
            records.len(),
            items.len()
        );

        records
    }

    async fn list_items(&self, candidate: &Candidate) -> Option<Vec<WorkItemSummary>> {
        let api = &*self.api;
        let id = candidate.id.as_str();

        for attempt in 1..=LISTING_ATTEMPTS {
            match self
                .throttle
                .collect_pages(|page| api.list_work_items(id, page), self.settings.max_listing_pages)
                .await
            {
                ApiResult::Success(items, _) => return Some(items),
                ApiResult::RateLimited(_) if attempt < LISTING_ATTEMPTS => {
                    self.throttle.note_hard_limit().await;
                    log::info!(target: LOG_TARGET, "Listing of '{id}' hit the quota, retrying after the cooldown");
                }
                ApiResult::RateLimited(_) => break,
                ApiResult::NotFound(_) => {
                    log::warn!(target: LOG_TARGET, "Repository '{id}' not found, skipping it");
                    return None;
                }
                ApiResult::Failed(e, _) => {
                    log::warn!(target: LOG_TARGET, "Could not list pull requests of '{id}', skipping it: {e:#}");
                    return None;
                }
            }
        }

        log::warn!(target: LOG_TARGET, "Skipping '{id}', its listing kept hitting the quota");
        None
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::harvest::test_support::{FakeApi, closed_pr, open_pr};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingProgress {
        lines: Mutex<Vec<String>>,
    }

    impl Progress for RecordingProgress {
        fn set_phase(&self, _phase: &str) {}
        fn set_determinate(&self, _callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {}
        fn set_indeterminate(&self, _callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {}
        fn println(&self, msg: &str) {
            self.lines.lock().unwrap().push(msg.to_string());
        }
        fn done(&self) {}
    }

    fn settings(dir: &tempfile::TempDir, target: usize) -> HarvestSettings {
        HarvestSettings {
            output_path: Utf8PathBuf::from_path_buf(dir.path().join("out.csv")).unwrap(),
            prior_outputs: Vec::new(),
            target_candidate_count: target,
            worker_pool_size: 3,
            inter_candidate_delay: Duration::from_secs(15),
            max_listing_pages: None,
            min_review_hours: 1.0,
            max_retries: 2,
            throttle: ThrottleSettings {
                inter_call_delay: Duration::from_secs(1),
                low_watermark: 100,
                reset_buffer: Duration::from_secs(10),
                hard_cooldown: Duration::from_secs(3600),
            },
            discovery: DiscoverySettings {
                search_query: "stars:>1".into(),
                min_items_per_candidate: 1,
                max_search_attempts: 2,
                search_retry_delay: Duration::from_secs(60),
            },
        }
    }

    async fn harvest(api: &Arc<FakeApi>, settings: HarvestSettings) -> Result<RunSummary> {
        let progress: Arc<dyn Progress> = Arc::new(RecordingProgress::default());
        Orchestrator::new(Arc::clone(api), settings, progress).await?.run().await
    }

    fn saved_keys(settings: &HarvestSettings) -> Vec<RecordKey> {
        csv::Reader::from_path(&settings.output_path)
            .unwrap()
            .deserialize::<MetricsRecord>()
            .map(|r| r.unwrap().key())
            .collect()
    }

    fn two_repos() -> FakeApi {
        FakeApi::new()
            .with_candidate("a/one", vec![closed_pr(1, 120, true), open_pr(2), closed_pr(3, 10, true)])
            .with_candidate("b/two", vec![closed_pr(7, 300, false), closed_pr(8, 90, true)])
    }

    #[tokio::test(start_paused = true)]
    async fn test_harvests_reviewed_items_of_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);
        let api = Arc::new(two_repos());

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                discovery: DiscoveryStatus::Complete,
                candidates_discovered: 2,
                candidates_processed: 2,
                records_added: 3,
                total_rows: 3,
                stopped_by_quota: false,
            }
        );
        assert_eq!(
            saved_keys(&settings),
            vec![RecordKey::new("a/one", 1), RecordKey::new("b/two", 7), RecordKey::new("b/two", 8)]
        );
        assert_eq!(api.calls_matching("rate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);

        let first = harvest(&Arc::new(two_repos()), settings.clone()).await.unwrap();
        let contents = std::fs::read_to_string(&settings.output_path).unwrap();

        let api = Arc::new(two_repos());
        let second = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(first.total_rows, 3);
        assert_eq!(second.candidates_discovered, 0);
        assert_eq!(second.records_added, 0);
        assert_eq!(second.total_rows, 3);
        assert_eq!(std::fs::read_to_string(&settings.output_path).unwrap(), contents);
        assert_eq!(api.calls_matching("list"), 0);
        assert_eq!(api.calls_matching("search"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_tops_up_to_target() {
        let dir = tempfile::tempdir().unwrap();

        let _ = harvest(&Arc::new(two_repos()), settings(&dir, 1)).await.unwrap();

        let api = Arc::new(two_repos());
        let summary = harvest(&api, settings(&dir, 2)).await.unwrap();

        assert_eq!(summary.candidates_processed, 1);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(api.calls_matching("count a/one"), 0);
        assert_eq!(api.calls_matching("list a/one"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_does_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);
        let api = Arc::new(two_repos().with_broken_item("b/two", 7));

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(summary.records_added, 2);
        assert_eq!(
            saved_keys(&settings),
            vec![RecordKey::new("a/one", 1), RecordKey::new("b/two", 8)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_skips_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);
        let mut api = two_repos();
        let _ = api.broken_listings.insert("a/one".into());
        let api = Arc::new(api);

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(summary.candidates_processed, 2);
        assert_eq!(saved_keys(&settings), vec![RecordKey::new("b/two", 7), RecordKey::new("b/two", 8)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_stops_after_current_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);
        let api = Arc::new(two_repos().with_review_rejections("a/one", 1, 1));

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert!(summary.stopped_by_quota);
        assert_eq!(summary.candidates_processed, 1);
        assert_eq!(saved_keys(&settings), vec![RecordKey::new("a/one", 1)]);
        assert_eq!(api.calls_matching("list b/two"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_is_retried_once_on_quota() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 1);
        let api = Arc::new(two_repos().with_listing_rejections("a/one", 1));

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(api.calls_matching("list a/one"), 2);
        assert_eq!(saved_keys(&settings), vec![RecordKey::new("a/one", 1)]);
        assert_eq!(summary.records_added, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_gives_up_after_second_quota_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 1);
        let api = Arc::new(two_repos().with_listing_rejections("a/one", 2));

        let start = tokio::time::Instant::now();
        let summary = harvest(&api, settings).await.unwrap();

        assert_eq!(api.calls_matching("list a/one"), 2);
        assert_eq!(summary.records_added, 0);

        // Only the retried rejection imposes a cooldown
        assert!(start.elapsed() >= Duration::from_secs(3600));
        assert!(start.elapsed() < Duration::from_secs(7200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_harvested_items_are_not_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let prior = Utf8PathBuf::from_path_buf(dir.path().join("old.csv")).unwrap();
        std::fs::write(&prior, "repo,pr_number\nb/two,7\n").unwrap();

        let mut settings = settings(&dir, 2);
        settings.prior_outputs = vec![prior];
        let api = FakeApi::new()
            .with_candidate("a/one", vec![closed_pr(1, 120, true)])
            .with_candidate("b/two", vec![closed_pr(7, 300, false), closed_pr(8, 90, true)]);
        let api = Arc::new(api);

        let orchestrator = Orchestrator::new(Arc::clone(&api), settings.clone(), Arc::new(RecordingProgress::default()))
            .await
            .unwrap();
        let candidate = Candidate {
            id: "b/two".into(),
            item_count: 2,
            stars: 1,
        };
        let records = orchestrator.process_candidate(&candidate, 0, 1).await;

        assert_eq!(records.iter().map(MetricsRecord::key).collect::<Vec<_>>(), vec![RecordKey::new("b/two", 8)]);
        assert_eq!(api.calls_matching("reviews b/two 7"), 0);
        assert_eq!(api.calls_matching("reviews b/two 8"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(&dir, 2);
        settings.inter_candidate_delay = Duration::from_secs(600);

        let start = tokio::time::Instant::now();
        let _ = harvest(&Arc::new(two_repos()), settings).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_search_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, 2);
        let api = two_repos();
        api.search_failures.store(10, Ordering::SeqCst);

        let _ = harvest(&Arc::new(api), settings.clone()).await.unwrap_err();
        assert!(!settings.output_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prior_outputs_count_toward_target() {
        let dir = tempfile::tempdir().unwrap();
        let prior = Utf8PathBuf::from_path_buf(dir.path().join("old.csv")).unwrap();
        std::fs::write(&prior, "repo,pr_number\na/one,1\n").unwrap();

        let mut settings = settings(&dir, 2);
        settings.prior_outputs = vec![prior];
        let api = Arc::new(two_repos());

        let summary = harvest(&api, settings.clone()).await.unwrap();

        assert_eq!(summary.candidates_processed, 1);
        assert_eq!(saved_keys(&settings), vec![RecordKey::new("b/two", 7), RecordKey::new("b/two", 8)]);
    }
}
