//! # Randomization of retry windows.
//!
//! When a publisher's upstream drops, every subscriber task under it fails at once. Without
//! jitter they would all retry on the same tick; [`JitterPolicy`] spreads them out.
//!
//! - [`JitterPolicy::None`] exact window
//! - [`JitterPolicy::Full`] uniform in `[0, window]`
//! - [`JitterPolicy::Equal`] `window/2 + uniform[0, window/2]`
//! - [`JitterPolicy::Decorrelated`] uniform in `[floor, 3 × window]`, capped

use std::time::Duration;

use rand::Rng;

/// Randomization strategy for [`BackoffPolicy`](crate::BackoffPolicy) windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No randomization.
    #[default]
    None,
    /// Uniform in `[0, window]`.
    Full,
    /// Half fixed, half random.
    Equal,
    /// Uniform in `[floor, 3 × window]`, capped at the policy maximum.
    ///
    /// Needs the extra context passed to [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to `window`. `Decorrelated` returns it unchanged.
    pub fn apply(&self, window: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => window,
            JitterPolicy::Full => uniform(0, window.as_millis() as u64),
            JitterPolicy::Equal => {
                let half = window.as_millis() as u64 / 2;
                Duration::from_millis(half) + uniform(0, half)
            }
        }
    }

    /// Decorrelated jitter. Other variants fall back to [`apply`](Self::apply) on `prev`.
    pub fn apply_decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if *self != JitterPolicy::Decorrelated {
            return self.apply(prev);
        }
        let floor_ms = floor.as_millis() as u64;
        let upper = (prev.as_millis() as u64)
            .saturating_mul(3)
            .min(max.as_millis() as u64)
            .max(floor_ms);
        if floor_ms >= upper {
            return floor;
        }
        uniform(floor_ms, upper)
    }
}

fn uniform(lo_ms: u64, hi_ms: u64) -> Duration {
    if hi_ms <= lo_ms {
        return Duration::from_millis(lo_ms);
    }
    Duration::from_millis(rand::rng().random_range(lo_ms..=hi_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_stays_zero() {
        for j in [JitterPolicy::None, JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(j.apply(Duration::ZERO), Duration::ZERO);
        }
    }

    #[test]
    fn decorrelated_respects_cap() {
        let j = JitterPolicy::Decorrelated;
        for _ in 0..100 {
            let d = j.apply_decorrelated(
                Duration::from_millis(10),
                Duration::from_secs(10),
                Duration::from_secs(1),
            );
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_secs(1));
        }
    }
}
