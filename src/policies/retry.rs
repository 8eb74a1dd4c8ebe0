//! # Retry policy for start routines.
//!
//! [`RetryPolicy`] decides whether a failed start is attempted again and how long to wait.
//! It is attachable to every task kind; a task whose policy allows retries is what the
//! runtime calls a *retry task*.
//!
//! ```text
//! start() ──Err(e)──► limit.allows(count)?
//!                        ├─ yes ─► count += 1, sleep(backoff.next(count-1) - elapsed), start() again
//!                        └─ no  ─► Limited(n>0): RetryExhausted{ last: e }
//!                                  Disabled:     e unchanged
//! ```
//!
//! ## Rules
//! - The retry counter lives on the task handle and resets to `0` after a successful start.
//! - The wait is a *window* measured from the attempt's start time, not a fixed sleep.
//! - Only [`TaskError::is_retryable`] reasons are retried.

use std::time::Duration;

use crate::error::TaskError;
use crate::policies::{BackoffPolicy, JitterPolicy};

/// Ceiling on the number of retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RetryLimit {
    /// Never retry; the start error propagates unmodified.
    #[default]
    Disabled,
    /// Retry at most `n` times, then fail with [`TaskError::RetryExhausted`].
    Limited(u32),
    /// Retry forever.
    Unlimited,
}

impl RetryLimit {
    /// Builds a limit from a signed count: negative is unlimited, zero is disabled.
    pub fn from_max(max: i64) -> Self {
        match max {
            m if m < 0 => RetryLimit::Unlimited,
            0 => RetryLimit::Disabled,
            m => RetryLimit::Limited(m.min(u32::MAX as i64) as u32),
        }
    }

    /// True if a task that already retried `count` times may retry once more.
    pub fn allows(&self, count: u32) -> bool {
        match *self {
            RetryLimit::Disabled => false,
            RetryLimit::Limited(max) => count < max,
            RetryLimit::Unlimited => true,
        }
    }

    /// Signed rendering used in log lines (`-1` = unlimited).
    pub fn as_signed(&self) -> i64 {
        match *self {
            RetryLimit::Disabled => 0,
            RetryLimit::Limited(max) => max as i64,
            RetryLimit::Unlimited => -1,
        }
    }
}

/// Retry ceiling plus the backoff window between attempts.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryPolicy {
    /// How many retries are allowed.
    pub limit: RetryLimit,
    /// Window between attempts, indexed by the retry number (0-based).
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// No retries.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Up to `max` retries, waiting a constant `interval` between attempts.
    pub fn limited(max: u32, interval: Duration) -> Self {
        Self {
            limit: RetryLimit::Limited(max),
            backoff: constant(interval),
        }
    }

    /// Retries forever, waiting a constant `interval` between attempts.
    pub fn unlimited(interval: Duration) -> Self {
        Self {
            limit: RetryLimit::Unlimited,
            backoff: constant(interval),
        }
    }

    /// Replaces the backoff (e.g. exponential with jitter).
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// True when any retry is possible at all.
    pub fn is_enabled(&self) -> bool {
        self.limit.allows(0)
    }

    /// Length of the window preceding retry number `count` (1-based).
    pub fn window(&self, count: u32) -> Duration {
        self.backoff.next(count.saturating_sub(1))
    }

    /// Final stop reason once the limit forbids another attempt.
    ///
    /// ### Notes
    /// - `Limited(n)` with `n > 0` wraps `last` in [`TaskError::RetryExhausted`].
    /// - `Disabled`, `Limited(0)` and non-retryable reasons return `last` unchanged.
    pub fn exhausted(&self, last: TaskError) -> TaskError {
        match self.limit {
            RetryLimit::Limited(max) if max > 0 && last.is_retryable() => {
                TaskError::RetryExhausted {
                    last: Box::new(last),
                }
            }
            _ => last,
        }
    }
}

fn constant(interval: Duration) -> BackoffPolicy {
    BackoffPolicy {
        first: interval,
        max: interval,
        factor: 1.0,
        jitter: JitterPolicy::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_limits_map_like_max_retry() {
        assert_eq!(RetryLimit::from_max(-1), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from_max(0), RetryLimit::Disabled);
        assert_eq!(RetryLimit::from_max(3), RetryLimit::Limited(3));
        assert_eq!(RetryLimit::Unlimited.as_signed(), -1);
    }

    #[test]
    fn limited_allows_exactly_max_retries() {
        let limit = RetryLimit::Limited(3);
        let allowed = (0..10).take_while(|c| limit.allows(*c)).count();
        assert_eq!(allowed, 3);
        assert!(RetryLimit::Unlimited.allows(u32::MAX));
        assert!(!RetryLimit::Disabled.allows(0));
    }

    #[test]
    fn exhausted_wraps_only_when_limited() {
        let err = TaskError::fail("io");
        assert_eq!(
            RetryPolicy::limited(3, Duration::ZERO).exhausted(err.clone()),
            TaskError::RetryExhausted {
                last: Box::new(err.clone())
            }
        );
        assert_eq!(RetryPolicy::disabled().exhausted(err.clone()), err);
        assert_eq!(
            RetryPolicy::limited(3, Duration::ZERO).exhausted(TaskError::Exist),
            TaskError::Exist
        );
    }

    #[test]
    fn constant_window() {
        let p = RetryPolicy::limited(5, Duration::from_millis(250));
        assert_eq!(p.window(1), Duration::from_millis(250));
        assert_eq!(p.window(5), Duration::from_millis(250));
    }
}
