//! # Lifecycle events emitted by supervisors and tasks.
//!
//! [`EventKind`] classifies events in three groups:
//! - **Task lifecycle**: starting, started, failed, retry, stopped, disposed, rejected
//! - **Supervision**: auto-stop, shutdown requested, grace outcome
//! - **Subscriber health**: overflow and panic of a subscriber worker
//!
//! [`Event`] carries the metadata: owner type, task id, reason, retry number, delays.
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically;
//! subscribers may receive events from different supervisors interleaved, and `seq`
//! restores the emission order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use streamvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_task("Publisher", 7)
//!     .with_reason("connection refused")
//!     .with_retry(2)
//!     .with_delay(Duration::from_millis(500));
//!
//! assert_eq!(ev.task_id, Some(7));
//! assert_eq!(ev.delay_ms, Some(500));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Task lifecycle ===
    /// A start attempt begins.
    ///
    /// Sets: `task`, `task_id`, `retry` (0 for the first attempt)
    TaskStarting,

    /// The start routine succeeded; the task is live.
    ///
    /// Sets: `task`, `task_id`
    TaskStarted,

    /// A start attempt failed.
    ///
    /// Sets: `task`, `task_id`, `retry`, `reason`
    TaskFailed,

    /// Another attempt is scheduled after a failed start.
    ///
    /// Sets: `task`, `task_id`, `retry` (the upcoming retry number), `delay_ms`, `reason`
    RetryScheduled,

    /// The retry ceiling was reached; the task stops for good.
    ///
    /// Sets: `task`, `task_id`, `retry`, `reason`
    RetryExhausted,

    /// The task's stop scope fired.
    ///
    /// Sets: `task`, `task_id`, `reason`
    TaskStopped,

    /// Dispose completed and the `stopped` promise was fulfilled.
    ///
    /// Sets: `task`, `task_id`, `reason`
    TaskDisposed,

    /// Admission into an already-stopped supervisor.
    ///
    /// Sets: `task`, `task_id`, `reason` (the supervisor's stop reason)
    TaskRejected,

    /// Start attempt exceeded its start timeout.
    ///
    /// Sets: `task`, `task_id`, `timeout_ms`
    StartTimeout,

    // === Supervision ===
    /// A supervisor without keep-alive ran out of children.
    ///
    /// Sets: `task`, `task_id`
    AutoStop,

    /// Shutdown of the tree was requested (OS signal or explicit call).
    ShutdownRequested,

    /// The tree disposed within the grace period.
    AllStoppedWithin,

    /// The grace period elapsed before the tree disposed.
    ///
    /// Sets: `reason` (stuck tasks)
    GraceExceeded,

    // === Subscriber health ===
    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberPanicked,

    /// A subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Owner type of the task (or subscriber name).
    pub task: Option<Arc<str>>,
    /// Id of the task, if it was admitted.
    pub task_id: Option<u32>,
    /// Human-readable reason (stop reason, error, overflow details).
    pub reason: Option<Arc<str>>,
    /// Retry number (0 = first attempt).
    pub retry: Option<u32>,
    /// Retry window in milliseconds.
    pub delay_ms: Option<u32>,
    /// Start timeout in milliseconds.
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates an event of the given kind with the current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            task_id: None,
            reason: None,
            retry: None,
            delay_ms: None,
            timeout_ms: None,
        }
    }

    /// Attaches the task's owner type and id.
    #[inline]
    pub fn with_task(mut self, owner: impl Into<Arc<str>>, id: u32) -> Self {
        self.task = Some(owner.into());
        self.task_id = Some(id);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a retry number.
    #[inline]
    pub fn with_retry(mut self, n: u32) -> Self {
        self.retry = Some(n);
        self
    }

    /// Attaches a retry window (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis(d));
        self
    }

    /// Attaches a start timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.task = Some(subscriber.into());
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.task = Some(subscriber.into());
        ev
    }

    /// True for events describing subscriber health, which are never re-fanned to subscribers.
    #[inline]
    pub fn is_subscriber_health(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::TaskStarting);
        let b = Event::new(EventKind::TaskStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn oversized_delay_saturates() {
        let ev = Event::new(EventKind::RetryScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
