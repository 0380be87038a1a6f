use std::time::Duration;

use crate::errors::{ErrorKind, ReconcileError};

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Decides whether, and after how long, a failed reconciliation pass is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The fixed delay before retrying a pass after a transient failure
    pub backoff: Duration,
    /// The number of consecutive failed passes after which the loop gives up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { backoff: DEFAULT_RETRY_BACKOFF, max_attempts: None }
    }
}

/// The outcome of consulting a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_attempts: Option<u32>) -> Self {
        Self { backoff, max_attempts }
    }

    /// `failures` is the number of consecutive failed passes, including the one that produced `error`.
    pub fn decide(&self, failures: u32, error: &ReconcileError) -> RetryDecision {
        if error.kind() == ErrorKind::Permanent {
            return RetryDecision::GiveUp;
        }
        match self.max_attempts {
            Some(max) if failures >= max => RetryDecision::GiveUp,
            _ => RetryDecision::RetryAfter(self.backoff),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traits::{CoinSourceError, StoreError};

    #[test]
    fn transient_errors_are_retried_until_the_limit() {
        let policy = RetryPolicy::new(Duration::from_millis(5), Some(3));
        let err = ReconcileError::from(StoreError::Unavailable("down".into()));
        assert_eq!(policy.decide(1, &err), RetryDecision::RetryAfter(Duration::from_millis(5)));
        assert_eq!(policy.decide(2, &err), RetryDecision::RetryAfter(Duration::from_millis(5)));
        assert_eq!(policy.decide(3, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn unlimited_by_default() {
        let policy = RetryPolicy::default();
        let err = ReconcileError::from(CoinSourceError::Unavailable("down".into()));
        assert_eq!(policy.decide(10_000, &err), RetryDecision::RetryAfter(DEFAULT_RETRY_BACKOFF));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let err = ReconcileError::from(CoinSourceError::InvalidData("garbage".into()));
        assert_eq!(policy.decide(1, &err), RetryDecision::GiveUp);
    }
}
