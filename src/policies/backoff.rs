//! # Backoff window between start attempts.
//!
//! [`BackoffPolicy`] computes how long a failed start waits before it is attempted again.
//! The window for retry `n` (0-based) is `first × factor^n`, capped at `max`, then jittered.
//! The base is derived from `n` alone, so jitter never compounds across retries.
//!
//! The runtime subtracts the time the failed attempt already took, so a slow failure
//! retries sooner than a fast one.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use streamvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(2),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(200));
//! assert_eq!(backoff.next(2), Duration::from_millis(800));
//! assert_eq!(backoff.next(9), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Growth of the retry window.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Window before the first retry.
    pub first: Duration,
    /// Upper bound of any window.
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant interval).
    pub factor: f64,
    /// Randomization applied to the capped window.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant one-second interval, matching the classic `RetryInterval` default.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Window preceding retry number `retry` (0-based).
    ///
    /// ### Notes
    /// - Non-finite or negative intermediate values clamp to `max`.
    /// - `Decorrelated` jitter draws from `[min(first, max), 3 × base]`, capped at `max`.
    pub fn next(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter,
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let p = policy(100, 1_000, 2.0, JitterPolicy::None);
        let windows: Vec<_> = (0..6).map(|n| p.next(n).as_millis()).collect();
        assert_eq!(windows, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn overflow_and_oversized_first_clamp_to_max() {
        let p = policy(100, 10_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(u32::MAX), Duration::from_secs(10));

        let p = policy(10_000, 5_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let p = policy(1_000, 30_000, 1.0, JitterPolicy::Equal);
        for n in 0..50 {
            let d = p.next(n);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_secs(1));
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let p = policy(100, 30_000, 2.0, JitterPolicy::Full);
        for n in 0..12 {
            let base = Duration::from_millis((100.0 * 2f64.powi(n as i32)).min(30_000.0) as u64);
            assert!(p.next(n) <= base, "retry {n}");
        }
    }

    #[test]
    fn decorrelated_stays_above_floor() {
        let p = policy(100, 30_000, 2.0, JitterPolicy::Decorrelated);
        for _ in 0..100 {
            assert!(p.next(8) >= Duration::from_millis(100));
        }
    }
}
