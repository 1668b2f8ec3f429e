use core::ops::RangeInclusive;

/// Bounds how many times one pull request is re-fetched after quota rejections.
///
/// Attempts are numbered from 1. The first attempt plus `max_retries` retries gives
/// `max_retries + 1` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Attempt numbers to run, in order.
    #[must_use]
    pub const fn attempts(&self) -> RangeInclusive<u32> {
        1..=self.max_retries.saturating_add(1)
    }

    /// Whether a failed `attempt` may be followed by another one.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts() {
        assert_eq!(RetryPolicy::new(0).attempts().collect::<Vec<_>>(), vec![1]);
        assert_eq!(RetryPolicy::new(2).attempts().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::new(0).should_retry(1));
    }

    #[test]
    fn test_large_limit_does_not_overflow() {
        assert_eq!(*RetryPolicy::new(u32::MAX).attempts().end(), u32::MAX);
    }
}
