//! Error types used by the streamvisor runtime, its tasks and its ring buffer.
//!
//! This module defines three enums:
//!
//! - [`TaskError`]: stop reasons. Every stopped task carries exactly one; deliberate
//!   terminations (`Complete`, `Exit`, `AutoStop`, ...) share the type with failures so the
//!   reason can cascade unmodified down the supervision tree.
//! - [`RingError`]: conditions returned synchronously to ring readers.
//! - [`RuntimeError`]: errors raised by the orchestration runtime itself.
//!
//! All of them provide `as_label` for logs/events.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// # Stop reasons and task failures.
///
/// `TaskError` is cheap to clone: a supervisor hands the same reason to every descendant
/// when it shuts down.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Supervisor ran out of children and is not kept alive.
    #[error("auto stop")]
    AutoStop,

    /// One-shot callback finished without a dispose routine.
    #[error("callback task")]
    CallbackComplete,

    /// Retry policy ran out; wraps the last real error.
    #[error("retry exhausted: {last}")]
    RetryExhausted {
        /// The error returned by the last attempt.
        last: Box<TaskError>,
    },

    /// Deliberate, successful termination.
    #[error("complete")]
    Complete,

    /// Process or root shutdown.
    #[error("exit")]
    Exit,

    /// A task with the same key is already registered.
    #[error("exist")]
    Exist,

    /// The enclosing scope was cancelled without an explicit reason.
    #[error("context cancelled")]
    Canceled,

    /// A start attempt exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// A start routine or run hook panicked.
    #[error("panic: {message}")]
    Panic {
        /// Panic payload rendered as text.
        message: Arc<str>,
    },

    /// Execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: Arc<str>,
    },

    /// Non-recoverable error (never retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: Arc<str>,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<Arc<str>>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<Arc<str>>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/events.
    ///
    /// # Example
    /// ```
    /// use streamvisor::TaskError;
    ///
    /// assert_eq!(TaskError::AutoStop.as_label(), "task_auto_stop");
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::AutoStop => "task_auto_stop",
            TaskError::CallbackComplete => "task_callback_complete",
            TaskError::RetryExhausted { .. } => "task_retry_exhausted",
            TaskError::Complete => "task_complete",
            TaskError::Exit => "task_exit",
            TaskError::Exist => "task_exist",
            TaskError::Canceled => "task_canceled",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Panic { .. } => "task_panic",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
        }
    }

    /// True for reasons that mean "stopped on purpose", not "failed".
    pub fn is_deliberate(&self) -> bool {
        matches!(
            self,
            TaskError::Complete | TaskError::Exit | TaskError::CallbackComplete
        )
    }

    /// Indicates whether a task stopped with this reason may be started again.
    ///
    /// Deliberate stops, auto-stop, fatal errors, duplicate keys and exhausted retries are final.
    ///
    /// # Example
    /// ```
    /// use streamvisor::TaskError;
    ///
    /// assert!(TaskError::fail("boom").is_retryable());
    /// assert!(!TaskError::fatal("nope").is_retryable());
    /// assert!(!TaskError::Complete.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !self.is_deliberate()
            && !matches!(
                self,
                TaskError::AutoStop
                    | TaskError::Fatal { .. }
                    | TaskError::Exist
                    | TaskError::RetryExhausted { .. }
            )
    }

    /// Unwraps [`TaskError::RetryExhausted`] down to the last real error.
    pub fn root_cause(&self) -> &TaskError {
        match self {
            TaskError::RetryExhausted { last } => last.root_cause(),
            other => other,
        }
    }

    /// Converts a caught panic payload into [`TaskError::Panic`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panic {
            message: panic_message(&*payload).into(),
        }
    }
}

/// Renders a panic payload (`&str` or `String`) as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// # Errors returned to ring readers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The slot was invalidated by the writer (lapped or detached from the ring).
    #[error("discard")]
    Discard,

    /// The writer was disposed; no further frames will arrive.
    #[error("ring closed")]
    Closed,

    /// Non-blocking read found the next slot still being written.
    #[error("frame not ready")]
    NotReady,
}

impl RingError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RingError::Discard => "ring_discard",
            RingError::Closed => "ring_closed",
            RingError::NotReady => "ring_not_ready",
        }
    }
}

/// # Errors produced by the runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some tasks were still alive.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Owner types and ids of tasks that did not shut down in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use streamvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
