//! # LogWriter: lifecycle events as `tracing` records
//!
//! A minimal subscriber that forwards every [`Event`] to `tracing`, so lifecycle events land
//! in whatever collector the application installed. Enabled by the `logging` feature.
//!
//! ## Example output (with a `fmt` collector)
//! ```text
//! DEBUG streamvisor::events: starting task=Publisher id=4 retry=0
//!  WARN streamvisor::events: retry scheduled task=Publisher id=4 retry=1 delay_ms=1000 reason="execution failed: refused"
//!  INFO streamvisor::events: auto stop task=Supervisor id=2
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "streamvisor::events";

/// Event-to-tracing subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let id = e.task_id.unwrap_or(0);
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::TaskStarting => {
                tracing::debug!(target: TARGET, task, id, retry = e.retry, "starting");
            }
            EventKind::TaskStarted => {
                tracing::debug!(target: TARGET, task, id, "started");
            }
            EventKind::TaskFailed => {
                tracing::warn!(target: TARGET, task, id, retry = e.retry, reason, "start failed");
            }
            EventKind::RetryScheduled => {
                tracing::warn!(
                    target: TARGET,
                    task, id, retry = e.retry, delay_ms = e.delay_ms, reason,
                    "retry scheduled"
                );
            }
            EventKind::RetryExhausted => {
                tracing::error!(target: TARGET, task, id, retry = e.retry, reason, "retry exhausted");
            }
            EventKind::StartTimeout => {
                tracing::warn!(target: TARGET, task, id, timeout_ms = e.timeout_ms, "start timeout");
            }
            EventKind::TaskStopped => {
                tracing::debug!(target: TARGET, task, id, reason, "stopped");
            }
            EventKind::TaskDisposed => {
                tracing::debug!(target: TARGET, task, id, reason, "disposed");
            }
            EventKind::TaskRejected => {
                tracing::warn!(target: TARGET, task, id, reason, "admission rejected");
            }
            EventKind::AutoStop => {
                tracing::info!(target: TARGET, task, id, "auto stop");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: TARGET, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: TARGET, "all stopped within grace");
            }
            EventKind::GraceExceeded => {
                tracing::error!(target: TARGET, stuck = reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: TARGET, subscriber = task, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: TARGET, subscriber = task, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
