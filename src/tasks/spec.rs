//! # Task specification.
//!
//! [`TaskSpec`] bundles a behaviour with the options it is admitted with (owner label, retry
//! policy, custom scope, span, start timeout, descriptions). Options left unset are inherited
//! from the runtime config at admission.
//!
//! A spec can be created from:
//! - a [`Task`] implementation ([`TaskSpec::new`], [`TaskSpec::from_arc`]),
//! - a start/dispose pair of closures ([`TaskSpec::callback`], [`TaskSpec::call`]),
//! - a stream source plus per-item callback ([`TaskSpec::channel`]).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use streamvisor::{RetryPolicy, TaskContext, TaskError, TaskFn, TaskSpec};
//!
//! let spec = TaskSpec::from_arc(TaskFn::arc("Puller", |ctx: TaskContext| async move {
//!     ctx.stopped().await;
//!     Ok::<_, TaskError>(())
//! }))
//! .with_retry(RetryPolicy::limited(3, Duration::from_millis(100)))
//! .with_description("url", "rtmp://origin/live/a");
//!
//! assert_eq!(spec.owner_type(), "Puller");
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tracing::Span;

use crate::core::{Behavior, CallbackDispose, HandleOptions, TaskHandle, TaskKind, TickStream};
use crate::error::TaskError;
use crate::policies::RetryPolicy;
use crate::sync::StopToken;
use crate::tasks::task::{Task, TaskContext};

/// Specification for admitting a task into a supervisor.
pub struct TaskSpec {
    kind: TaskKind,
    owner: Arc<str>,
    behavior: Behavior,
    opts: HandleOptions,
}

impl TaskSpec {
    /// Spec for a [`Task`] implementation.
    pub fn new<T: Task>(task: T) -> Self {
        Self::from_arc(Arc::new(task))
    }

    /// Spec for a shared [`Task`] implementation.
    pub fn from_arc(task: Arc<dyn Task>) -> Self {
        let owner: Arc<str> = task.owner_type().into();
        Self::with_behavior(TaskKind::Task, owner, Behavior::Simple(task))
    }

    /// Spec for a start closure with an optional dispose closure.
    ///
    /// Without `dispose` the task is one-shot: a successful start stops it with
    /// [`TaskError::CallbackComplete`], so it never stays registered.
    pub fn callback<S, D>(start: S, dispose: Option<D>) -> Self
    where
        S: FnMut() -> Result<(), TaskError> + Send + 'static,
        D: FnMut() + Send + 'static,
    {
        let behavior = Behavior::Callback {
            start: Mutex::new(Box::new(start)),
            dispose: dispose.map(|d| Mutex::new(Box::new(d) as CallbackDispose)),
        };
        Self::with_behavior(TaskKind::Task, "CallbackTask".into(), behavior)
    }

    /// One-shot callback, executed on the supervisor's loop.
    pub fn call<S>(start: S) -> Self
    where
        S: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        let mut spec = Self::callback(start, None::<fn()>).with_retry(RetryPolicy::disabled());
        spec.kind = TaskKind::Call;
        spec
    }

    /// Spec for a task driven by a stream.
    ///
    /// `source` runs at every start and returns the stream for that lifecycle; `on_item` runs
    /// on the supervisor's loop for every item. The task stops with [`TaskError::Complete`]
    /// once the stream ends.
    pub fn channel<F, St, T, C>(mut source: F, on_item: C) -> Self
    where
        F: FnMut(&TaskContext) -> Result<St, TaskError> + Send + 'static,
        St: Stream<Item = T> + Send + 'static,
        T: Send + 'static,
        C: FnMut(T) + Send + 'static,
    {
        let on_item = Arc::new(Mutex::new(on_item));
        let factory = move |ctx: &TaskContext| -> Result<TickStream, TaskError> {
            let stream = source(ctx)?;
            let on_item = Arc::clone(&on_item);
            Ok(stream.map(move |item| (*on_item.lock())(item)).boxed())
        };
        let behavior = Behavior::Channel {
            source: Mutex::new(Box::new(factory)),
            pending: Mutex::new(None),
        };
        Self::with_behavior(TaskKind::Channel, "ChannelTask".into(), behavior)
    }

    pub(crate) fn with_behavior(kind: TaskKind, owner: Arc<str>, behavior: Behavior) -> Self {
        Self {
            kind,
            owner,
            behavior,
            opts: HandleOptions::default(),
        }
    }

    /// Overrides the owner-type label.
    pub fn with_owner_type(mut self, owner: impl Into<Arc<str>>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Sets the retry policy (default: inherited from the runtime config).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.opts.retry = Some(retry);
        self
    }

    /// Derives the task's scope from `scope` instead of the supervisor's.
    ///
    /// The task then outlives a supervisor stop until `scope` fires; the supervisor still
    /// stops it when it shuts down.
    pub fn with_scope(mut self, scope: StopToken) -> Self {
        self.opts.scope = Some(scope);
        self
    }

    /// Uses `span` instead of the span derived from the supervisor's.
    pub fn with_span(mut self, span: Span) -> Self {
        self.opts.span = Some(span);
        self
    }

    /// Bounds each start attempt; `Duration::ZERO` disables the bound.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.opts.start_timeout = Some(timeout);
        self
    }

    /// Adds a description entry.
    pub fn with_description(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.opts.descriptions.insert(key.into(), value.to_string());
        self
    }

    /// Owner-type label.
    pub fn owner_type(&self) -> &str {
        &self.owner
    }

    /// Kind tag.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Builds the (not yet admitted) handle.
    pub fn into_handle(self) -> TaskHandle {
        TaskHandle::new(self.kind, self.owner, self.behavior, self.opts)
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("retry", &self.opts.retry)
            .field("start_timeout", &self.opts.start_timeout)
            .finish()
    }
}
