//! # Function-backed task (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure `F: Fn(TaskContext) -> Fut` used as the background run hook.
//! Each lifecycle (including a respawn after a retryable failure) calls the closure again and
//! gets a fresh future that owns its state; share state across lifecycles with an explicit
//! `Arc<...>` captured by the closure.
//!
//! ## Example
//! ```rust
//! use streamvisor::{TaskContext, TaskError, TaskFn};
//!
//! let relay = TaskFn::arc("Relay", |ctx: TaskContext| async move {
//!     ctx.stopped().await;
//!     Ok::<_, TaskError>(())
//! });
//! # let _ = relay;
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use crate::error::TaskError;
use crate::tasks::task::{BoxTaskFuture, Task, TaskContext};

/// Task whose run hook is a closure.
#[derive(Debug)]
pub struct TaskFn<F> {
    owner: Cow<'static, str>,
    f: F,
}

impl<F> TaskFn<F> {
    /// Creates a new function-backed task.
    pub fn new(owner: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            owner: owner.into(),
            f,
        }
    }

    /// Creates the task behind an `Arc`.
    pub fn arc(owner: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(owner, f))
    }
}

#[async_trait::async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn owner_type(&self) -> &str {
        &self.owner
    }

    fn run(self: Arc<Self>, ctx: TaskContext) -> Option<BoxTaskFuture> {
        Some(Box::pin((self.f)(ctx)))
    }
}
