//! # Task trait and per-attempt context.
//!
//! A [`Task`] is the behaviour a supervisor drives through its lifecycle:
//!
//! ```text
//! admitted ──► start(ctx) ──Ok──► run(ctx) spawned (optional) ──► stopped ──► dispose(reason)
//!                 │
//!                 └─Err──► retry per RetryPolicy, or stop with the (exhausted) error
//! ```
//!
//! `start` runs **inline** on the admitting supervisor's event loop, so siblings are started
//! in admission order. It must not block for long; long-running work belongs in [`Task::run`],
//! which is spawned on its own tokio task and stops the task when it returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use crate::core::{Supervisor, TaskHandle};
use crate::error::TaskError;
use crate::sync::StopToken;

/// Boxed future returned by [`Task::run`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// # Supervised unit of work.
///
/// Every method has a default, so a task implements only the phases it needs.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use streamvisor::{BoxTaskFuture, Task, TaskContext, TaskError};
///
/// struct Puller { url: String }
///
/// #[async_trait]
/// impl Task for Puller {
///     fn owner_type(&self) -> &str { "Puller" }
///
///     async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
///         if self.url.is_empty() {
///             return Err(TaskError::fatal("empty url"));
///         }
///         Ok(())
///     }
///
///     fn run(self: Arc<Self>, ctx: TaskContext) -> Option<BoxTaskFuture> {
///         Some(Box::pin(async move {
///             ctx.stopped().await;
///             Ok(())
///         }))
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Label used in logs, events and descriptions.
    fn owner_type(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Start routine. An error fails this attempt (and may be retried).
    async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Background hook spawned after a successful start.
    ///
    /// `Ok(())` stops the task with [`TaskError::Complete`]; `Err(e)` stops it with `e`.
    /// Returning `None` keeps the task alive until something else stops it.
    fn run(self: Arc<Self>, _ctx: TaskContext) -> Option<BoxTaskFuture> {
        None
    }

    /// Cleanup after the task stopped. Runs exactly once per successful start.
    async fn dispose(&self, _reason: &TaskError) {}
}

/// What a task sees of itself during one lifecycle.
///
/// The scope is the task's current stop token; after a retry the task gets a fresh one.
#[derive(Clone)]
pub struct TaskContext {
    handle: TaskHandle,
    scope: StopToken,
    span: Span,
}

impl TaskContext {
    pub(crate) fn new(handle: TaskHandle, scope: StopToken, span: Span) -> Self {
        Self {
            handle,
            scope,
            span,
        }
    }

    /// Handle of the task this context belongs to.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Id assigned at admission.
    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    /// Stop scope of the current lifecycle.
    pub fn scope(&self) -> &StopToken {
        &self.scope
    }

    /// True once this lifecycle was stopped.
    pub fn is_stopped(&self) -> bool {
        self.scope.is_stopped()
    }

    /// Completes when this lifecycle is stopped.
    pub async fn stopped(&self) {
        self.scope.stopped().await
    }

    /// Stops the task with `reason`.
    pub fn stop(&self, reason: TaskError) -> bool {
        self.scope.stop(reason)
    }

    /// Span injected at admission.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Supervisor that owns the task, if it is still around.
    pub fn supervisor(&self) -> Option<Supervisor> {
        self.handle.parent().and_then(Supervisor::from_handle)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.handle.id())
            .field("owner_type", &self.handle.owner_type())
            .field("stopped", &self.scope.is_stopped())
            .finish()
    }
}
