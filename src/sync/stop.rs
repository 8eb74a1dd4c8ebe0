//! # Cancellation token carrying a reason.
//!
//! [`StopToken`] pairs a [`CancellationToken`] with a set-once [`TaskError`] and a link to
//! the token it was derived from. Stopping a token cancels every token derived from it;
//! a derived token that was cancelled through its ancestor reports the nearest ancestor's
//! reason, so each descendant can tell *why* it was stopped.
//!
//! ```text
//! root ──child()──► supervisor ──child()──► task
//!  stop(Exit)         reason() = Exit         reason() = Exit
//! ```
//!
//! ## Rules
//! - The reason is recorded **before** the token is cancelled.
//! - The first `stop` wins; later calls return `false`.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::TaskError;

struct Inner {
    token: CancellationToken,
    reason: OnceLock<TaskError>,
    parent: Option<StopToken>,
}

/// Cloneable cancellation scope with a stop reason.
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl StopToken {
    /// Creates a new root scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derives a scope that is stopped whenever `self` is.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                reason: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Records `reason` and cancels the scope.
    ///
    /// Returns `false` if the scope was already stopped, directly or through an ancestor;
    /// the earlier reason stays in effect.
    pub fn stop(&self, reason: TaskError) -> bool {
        if self.is_stopped() || self.inner.reason.set(reason).is_err() {
            return false;
        }
        self.inner.token.cancel();
        true
    }

    /// True once this scope or any ancestor was stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The reason this scope stopped, or `None` while it is running.
    ///
    /// A scope stopped through an ancestor inherits the nearest recorded reason; a bare
    /// cancellation with no recorded reason anywhere reports [`TaskError::Canceled`].
    pub fn reason(&self) -> Option<TaskError> {
        if !self.is_stopped() {
            return None;
        }
        let mut cur = Some(self);
        while let Some(scope) = cur {
            if let Some(reason) = scope.inner.reason.get() {
                return Some(reason.clone());
            }
            cur = scope.inner.parent.as_ref();
        }
        Some(TaskError::Canceled)
    }

    /// Completes when the scope is stopped.
    pub async fn stopped(&self) {
        self.inner.token.cancelled().await
    }

    /// Owned variant of [`StopToken::stopped`], usable in `'static` streams.
    pub fn stopped_owned(&self) -> WaitForCancellationFutureOwned {
        self.inner.token.clone().cancelled_owned()
    }

    /// The underlying cancellation token (e.g. for code that only takes `CancellationToken`).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// True if both handles refer to the same scope.
    pub fn same_scope(&self, other: &StopToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .field("reason", &self.inner.reason.get())
            .finish()
    }
}
