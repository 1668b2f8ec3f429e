use crate::remote::RateLimitInfo;
use chrono::{DateTime, Utc};
use core::time::Duration;
use tokio::time::Instant;

/// Quota bookkeeping shared by every remote call.
///
/// Pure state: callers decide when to sleep, this type only computes how long.
/// It lives behind the [`Throttle`](super::Throttle)'s mutex.
#[derive(Debug, Clone, Default)]
pub struct RateBudget {
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    last_call_at: Option<Instant>,
    cooldown_until: Option<Instant>,
    hard_limits: u32,
}

impl RateBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    #[must_use]
    pub const fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_at
    }

    /// Number of hard quota rejections seen so far.
    #[must_use]
    pub const fn hard_limits(&self) -> u32 {
        self.hard_limits
    }

    /// Record a quota snapshot reported by the remote.
    ///
    /// Snapshots from concurrent calls can arrive out of order. Within one window the
    /// lowest `remaining` wins; a later `reset_at` starts a new window.
    pub fn observe(&mut self, info: RateLimitInfo) {
        match self.reset_at {
            Some(current) if info.reset_at < current => {}
            Some(current) if info.reset_at == current => {
                self.remaining = Some(self.remaining.map_or(info.remaining, |r| r.min(info.remaining)));
            }
            _ => {
                self.remaining = Some(info.remaining);
                self.reset_at = Some(info.reset_at);
            }
        }
    }

    #[must_use]
    pub fn is_exhausted(&self, low_watermark: u32) -> bool {
        self.remaining.is_some_and(|r| r < low_watermark)
    }

    /// How long to wait for the quota window to reset, if the budget is exhausted.
    ///
    /// Returns `Some(Duration::ZERO)` when exhausted but the reset time already passed.
    #[must_use]
    pub fn reset_wait(&self, now: DateTime<Utc>, low_watermark: u32, buffer: Duration) -> Option<Duration> {
        if !self.is_exhausted(low_watermark) {
            return None;
        }

        let Some(reset_at) = self.reset_at else {
            return Some(Duration::ZERO);
        };

        let resume_at = reset_at + chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero());
        Some((resume_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Forget the exhausted snapshot once its reset time has passed.
    pub const fn replenish(&mut self) {
        self.remaining = None;
    }

    /// Time left before the next call may start, given the minimum spacing.
    #[must_use]
    pub fn spacing_wait(&self, now: Instant, min_spacing: Duration) -> Duration {
        self.last_call_at
            .map_or(Duration::ZERO, |last| min_spacing.saturating_sub(now.saturating_duration_since(last)))
    }

    pub const fn mark_call(&mut self, now: Instant) {
        self.last_call_at = Some(now);
    }

    /// Enter a fixed cooldown after a hard quota rejection.
    ///
    /// When cooldowns overlap the one ending last wins.
    pub fn start_cooldown(&mut self, now: Instant, duration: Duration) {
        let until = now + duration;
        if self.cooldown_until.is_none_or(|existing| existing < until) {
            self.cooldown_until = Some(until);
        }
        self.hard_limits += 1;
    }

    #[must_use]
    pub fn cooldown_wait(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }

    pub const fn end_cooldown(&mut self) {
        self.cooldown_until = None;
    }
}
