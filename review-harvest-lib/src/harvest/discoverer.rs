use super::LOG_TARGET;
use super::throttle::Throttle;
use crate::HashSet;
use crate::remote::{ApiResult, RemoteApi};
use core::fmt::Formatter;
use core::time::Duration;
use std::sync::Arc;
use strum::Display;

/// A repository admitted for harvesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// `owner/name`
    pub id: String,
    pub item_count: u64,
    pub stars: u64,
}

impl core::fmt::Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({} pull requests, {} stars)", self.id, self.item_count, self.stars)
    }
}

/// How candidate discovery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DiscoveryStatus {
    /// The requested number of candidates was found.
    #[strum(to_string = "complete")]
    Complete,

    /// Search results ran out before the target was reached.
    #[strum(to_string = "search results exhausted")]
    Exhausted,

    /// Stopped after a hard quota rejection.
    #[strum(to_string = "stopped by quota exhaustion")]
    HardLimited,

    /// Every search attempt failed.
    #[strum(to_string = "failed")]
    Failed,
}

/// Outcome of candidate discovery, partial or not.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub status: DiscoveryStatus,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub search_query: String,
    pub min_items_per_candidate: u64,
    pub max_search_attempts: u32,
    pub search_retry_delay: Duration,
}

enum ScanEnd {
    Done,
    Exhausted,
    HardLimited,
    SearchFailed(ohno::AppError),
}

/// Finds popular repositories with enough pull requests to be worth harvesting.
#[derive(Debug)]
pub struct Discoverer<A> {
    api: Arc<A>,
    throttle: Arc<Throttle>,
    settings: DiscoverySettings,
}

impl<A: RemoteApi> Discoverer<A> {
    #[must_use]
    pub const fn new(api: Arc<A>, throttle: Arc<Throttle>, settings: DiscoverySettings) -> Self {
        Self { api, throttle, settings }
    }

    /// Find up to `target` candidates, skipping those in `known`.
    ///
    /// Candidates admitted before a failed search attempt are kept, and later attempts
    /// resume from the first search page without re-counting repositories already judged.
    pub async fn discover(&self, target: usize, known: &HashSet<String>) -> Discovery {
        let mut candidates = Vec::new();
        let mut judged = HashSet::default();

        if target == 0 {
            return Discovery {
                candidates,
                status: DiscoveryStatus::Complete,
            };
        }

        log::info!(target: LOG_TARGET, "Looking for {target} repositories with at least {} pull requests", self.settings.min_items_per_candidate);

        let attempts = self.settings.max_search_attempts.max(1);
        for attempt in 1..=attempts {
            let status = match self.scan(target, known, &mut candidates, &mut judged).await {
                ScanEnd::Done => DiscoveryStatus::Complete,
                ScanEnd::Exhausted => DiscoveryStatus::Exhausted,
                ScanEnd::HardLimited => DiscoveryStatus::HardLimited,
                ScanEnd::SearchFailed(e) => {
                    log::warn!(target: LOG_TARGET, "Repository search failed (attempt {attempt}/{attempts}): {e:#}");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.search_retry_delay).await;
                    }
                    continue;
                }
            };

            return Discovery { candidates, status };
        }

        log::error!(target: LOG_TARGET, "Giving up on repository search after {attempts} attempts");
        Discovery {
            candidates,
            status: DiscoveryStatus::Failed,
        }
    }

    async fn scan(
        &self,
        target: usize,
        known: &HashSet<String>,
        candidates: &mut Vec<Candidate>,
        judged: &mut HashSet<String>,
    ) -> ScanEnd {
        let api = &*self.api;
        let query = self.settings.search_query.as_str();
        let mut page = 1;

        loop {
            if self.throttle.hard_limit_hit().await {
                return ScanEnd::HardLimited;
            }

            let hits = match self.throttle.run(|| api.search_candidates(query, page)).await {
                ApiResult::Success(hits, _) => hits,
                ApiResult::RateLimited(_) => {
                    self.throttle.note_hard_limit().await;
                    return ScanEnd::HardLimited;
                }
                ApiResult::NotFound(_) => return ScanEnd::SearchFailed(ohno::app_err!("search endpoint not found")),
                ApiResult::Failed(e, _) => return ScanEnd::SearchFailed(e),
            };

            let has_next = hits.has_next && !hits.items.is_empty();

            for hit in hits.items {
                if candidates.len() >= target {
                    return ScanEnd::Done;
                }

                if known.contains(&hit.id) || !judged.insert(hit.id.clone()) {
                    continue;
                }

                if self.throttle.hard_limit_hit().await {
                    return ScanEnd::HardLimited;
                }

                let count = match self.throttle.run(|| api.count_work_items(&hit.id)).await {
                    ApiResult::Success(count, _) => count,
                    ApiResult::RateLimited(_) => {
                        self.throttle.note_hard_limit().await;
                        return ScanEnd::HardLimited;
                    }
                    ApiResult::NotFound(_) => {
                        log::debug!(target: LOG_TARGET, "Repository '{}' disappeared, skipping", hit.id);
                        continue;
                    }
                    ApiResult::Failed(e, _) => {
                        log::warn!(target: LOG_TARGET, "Could not count pull requests of '{}': {e:#}", hit.id);
                        continue;
                    }
                };

                if count < self.settings.min_items_per_candidate {
                    log::debug!(target: LOG_TARGET, "Skipping '{}' with only {count} pull requests", hit.id);
                    continue;
                }

                let candidate = Candidate {
                    id: hit.id,
                    item_count: count,
                    stars: hit.stars,
                };
                log::info!(target: LOG_TARGET, "Selected {}/{target}: {candidate}", candidates.len() + 1);
                candidates.push(candidate);
            }

            if candidates.len() >= target {
                return ScanEnd::Done;
            }

            if !has_next {
                return ScanEnd::Exhausted;
            }

            page += 1;
        }
    }
}
