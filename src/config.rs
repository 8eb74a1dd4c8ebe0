//! # Runtime, publish and subscribe configuration.
//!
//! Plain `Default`-able structs; every field is public.
//!
//! - [`RuntimeConfig`] supervision tree settings (grace, event bus, task defaults)
//! - [`PublishConfig`] ring sizing and buffering for a publishing [`AVTrack`](crate::AVTrack)
//! - [`SubscribeConfig`] playback mode for an [`AVRingReader`](crate::AVRingReader)
//!
//! ## Sentinel values
//! - `start_timeout = 0s` → no start timeout
//! - `buffer_time = 0s` → no buffering requirement

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::policies::RetryPolicy;

/// Settings for a supervision tree, fixed when the root is built.
///
/// ## Field semantics
/// - `grace`: how long [`Supervisor::shutdown_with_grace`](crate::Supervisor::shutdown_with_grace)
///   waits for the tree to dispose before reporting stuck tasks
/// - `bus_capacity`: event bus ring size (min 1; clamped by the bus)
/// - `retry`: retry policy for specs that do not set their own
/// - `start_timeout`: per-attempt start timeout for specs that do not set their own
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum time to wait for the tree to dispose on shutdown.
    pub grace: Duration,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Default start timeout (`Duration::ZERO` = none).
    pub start_timeout: Duration,
}

impl RuntimeConfig {
    /// Returns the default start timeout as an `Option`.
    #[inline]
    pub fn default_start_timeout(&self) -> Option<Duration> {
        if self.start_timeout == Duration::ZERO {
            None
        } else {
            Some(self.start_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `retry` disabled
    /// - `start_timeout = 0s` (none)
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            retry: RetryPolicy::default(),
            start_timeout: Duration::ZERO,
        }
    }
}

/// Inclusive bounds on the number of ring slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeRange {
    /// Initial and minimum slot count.
    pub min: usize,
    /// Maximum slot count reached by automatic growth.
    pub max: usize,
}

impl SizeRange {
    /// Creates a range; `min` is raised to at least 2 and `max` to at least `min`.
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(2);
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Clamps `n` into the range.
    pub fn clamp(&self, n: usize) -> usize {
        n.clamp(self.min, self.max)
    }
}

impl Default for SizeRange {
    fn default() -> Self {
        Self::new(20, 1024)
    }
}

impl From<RangeInclusive<usize>> for SizeRange {
    fn from(r: RangeInclusive<usize>) -> Self {
        Self::new(*r.start(), *r.end())
    }
}

/// Settings for a publishing track.
#[derive(Clone, Debug, Default)]
pub struct PublishConfig {
    /// Ring slot bounds; the ring starts at `min`.
    pub ring_size: SizeRange,
    /// Media time the ring tries to keep buffered behind the writer (`0s` = none).
    pub buffer_time: Duration,
}

/// Playback mode of a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SubMode {
    /// Start at the latest keyframe and chase the live edge (fast-forward allowed).
    #[default]
    Real,
    /// Start at the live edge and never skip ahead on start.
    NoJump,
    /// Start `buffer_time` behind the live edge and never fast-forward.
    Buffer,
    /// Start at the live edge and drop frames until the next keyframe arrives.
    WaitKey,
}

/// Settings for a subscriber.
#[derive(Clone, Debug, Default)]
pub struct SubscribeConfig {
    /// Playback mode.
    pub mode: SubMode,
    /// Media time to buffer before playback in [`SubMode::Buffer`].
    pub buffer_time: Duration,
}

impl SubscribeConfig {
    /// Shorthand for a config with the given mode and no buffering.
    pub fn with_mode(mode: SubMode) -> Self {
        Self {
            mode,
            buffer_time: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_range_normalizes_bounds() {
        let r = SizeRange::new(0, 1);
        assert_eq!((r.min, r.max), (2, 2));
        let r: SizeRange = (10..=40).into();
        assert_eq!(r.clamp(5), 10);
        assert_eq!(r.clamp(55), 40);
    }

    #[test]
    fn zero_start_timeout_means_none() {
        let mut cfg = RuntimeConfig::default();
        assert!(cfg.default_start_timeout().is_none());
        cfg.start_timeout = Duration::from_millis(5);
        assert_eq!(cfg.default_start_timeout(), Some(Duration::from_millis(5)));
    }
}
