//! # Task handles.
//!
//! A [`TaskHandle`] is the shared, cloneable identity of one supervised task. It owns the
//! behaviour, the stop scope of the current lifecycle, the `started`/`stopped` promises and
//! the listener lists. Supervisors hold handles of their children; callers keep handles to
//! wait on or stop what they added.
//!
//! ## Architecture
//! ```text
//!             parent (Weak, set once)
//!                  ▲
//! TaskHandle ──► TaskCore ─┬─ behavior: Simple | Callback | Channel | Supervisor
//!                          ├─ life:     token (StopToken), started, stopped (Promise)
//!                          ├─ listeners: on_start, on_before_dispose, on_dispose
//!                          └─ retry policy + counter, descriptions, span, level
//! ```
//!
//! ## Rules
//! - The id is assigned at first admission and never changes (0 before that).
//! - The parent is set once; adding a handle to a second supervisor only lets that
//!   supervisor *observe* it (stop it on cascade), never dispose it.
//! - A stop issued before admission is remembered and applied when the handle is admitted.
//! - Listeners fire in registration order, once per lifecycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::Span;

use crate::core::supervisor::{Runtime, SupervisorCore};
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::policies::RetryPolicy;
use crate::sync::{Promise, StopToken};
use crate::tasks::{Task, TaskContext};

static TASK_ID: AtomicU32 = AtomicU32::new(0);

/// Kind tag reported in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Ordinary task (start, optional run hook, dispose).
    Task,
    /// Task owning children and an event loop.
    Supervisor,
    /// Task driven by an external stream of ticks.
    Channel,
    /// One-shot callback executed on a supervisor's loop.
    Call,
}

impl TaskKind {
    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskKind::Task => "task",
            TaskKind::Supervisor => "supervisor",
            TaskKind::Channel => "channel",
            TaskKind::Call => "call",
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    /// Created or reset, not started.
    Init = 0,
    /// Start routine in progress (including retry windows).
    Starting = 1,
    /// Start routine succeeded.
    Started = 2,
    /// Background run hook is live.
    Running = 3,
    /// Dispose in progress.
    Disposing = 4,
    /// Dispose finished.
    Disposed = 5,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Init,
            1 => TaskState::Starting,
            2 => TaskState::Started,
            3 => TaskState::Running,
            4 => TaskState::Disposing,
            _ => TaskState::Disposed,
        }
    }
}

pub(crate) type Listener = Arc<dyn Fn(&TaskHandle) + Send + Sync>;
pub(crate) type CallbackStart = Box<dyn FnMut() -> Result<(), TaskError> + Send>;
pub(crate) type CallbackDispose = Box<dyn FnMut() + Send>;
pub(crate) type TickStream = BoxStream<'static, ()>;
pub(crate) type SourceFactory =
    Box<dyn FnMut(&TaskContext) -> Result<TickStream, TaskError> + Send>;

/// What the lifecycle does in each phase.
pub(crate) enum Behavior {
    Simple(Arc<dyn Task>),
    Callback {
        start: Mutex<CallbackStart>,
        dispose: Option<Mutex<CallbackDispose>>,
    },
    Channel {
        source: Mutex<SourceFactory>,
        pending: Mutex<Option<TickStream>>,
    },
    Supervisor(Arc<SupervisorCore>),
}

struct Life {
    token: Option<StopToken>,
    pending_stop: Option<TaskError>,
    concluded: Option<TaskError>,
    started: Arc<Promise<Result<(), TaskError>>>,
    stopped: Arc<Promise<TaskError>>,
}

impl Life {
    fn fresh(token: Option<StopToken>) -> Self {
        Self {
            token,
            pending_stop: None,
            concluded: None,
            started: Arc::new(Promise::new()),
            stopped: Arc::new(Promise::new()),
        }
    }
}

#[derive(Default)]
struct Listeners {
    start: Vec<Listener>,
    before_dispose: Vec<Listener>,
    dispose: Vec<Listener>,
}

/// Options fixed when the handle is built.
#[derive(Default)]
pub(crate) struct HandleOptions {
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) scope: Option<StopToken>,
    pub(crate) span: Option<Span>,
    pub(crate) start_timeout: Option<Duration>,
    pub(crate) descriptions: BTreeMap<String, String>,
}

pub(crate) struct TaskCore {
    id: AtomicU32,
    kind: TaskKind,
    owner: Arc<str>,
    pub(crate) behavior: Behavior,
    retry: Mutex<Option<RetryPolicy>>,
    retry_count: AtomicU32,
    start_timeout: Mutex<Option<Duration>>,
    custom_scope: Option<StopToken>,
    requested_span: Mutex<Option<Span>>,
    span: OnceLock<Span>,
    runtime: OnceLock<Arc<Runtime>>,
    parent: OnceLock<Weak<TaskCore>>,
    parent_scope: OnceLock<StopToken>,
    level: AtomicU8,
    state: AtomicU8,
    life: Mutex<Life>,
    start_time: Mutex<Option<Instant>>,
    listeners: Mutex<Listeners>,
    descriptions: Mutex<BTreeMap<String, String>>,
}

/// Shared handle to a supervised task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) core: Arc<TaskCore>,
}

/// Non-owning reference to a task.
#[derive(Clone)]
pub struct WeakTaskHandle(Weak<TaskCore>);

impl WeakTaskHandle {
    /// Upgrades to a handle if the task is still referenced somewhere.
    pub fn upgrade(&self) -> Option<TaskHandle> {
        self.0.upgrade().map(|core| TaskHandle { core })
    }
}

impl TaskHandle {
    pub(crate) fn new(
        kind: TaskKind,
        owner: Arc<str>,
        behavior: Behavior,
        opts: HandleOptions,
    ) -> Self {
        Self {
            core: Arc::new(TaskCore {
                id: AtomicU32::new(0),
                kind,
                owner,
                behavior,
                retry: Mutex::new(opts.retry),
                retry_count: AtomicU32::new(0),
                start_timeout: Mutex::new(opts.start_timeout),
                custom_scope: opts.scope,
                requested_span: Mutex::new(opts.span),
                span: OnceLock::new(),
                runtime: OnceLock::new(),
                parent: OnceLock::new(),
                parent_scope: OnceLock::new(),
                level: AtomicU8::new(0),
                state: AtomicU8::new(TaskState::Init as u8),
                life: Mutex::new(Life::fresh(None)),
                start_time: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
                descriptions: Mutex::new(opts.descriptions),
            }),
        }
    }

    // ---- Identity ----

    /// Id assigned at first admission (`0` before).
    pub fn id(&self) -> u32 {
        self.core.id.load(Ordering::Acquire)
    }

    /// Owner-type label.
    pub fn owner_type(&self) -> &str {
        &self.core.owner
    }

    /// Kind tag.
    pub fn kind(&self) -> TaskKind {
        self.core.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.core.state.load(Ordering::Acquire))
    }

    /// Depth in the supervision tree (root = 0).
    pub fn level(&self) -> u8 {
        self.core.level.load(Ordering::Relaxed)
    }

    /// Span injected at admission (disabled before admission).
    pub fn span(&self) -> Span {
        self.core.span.get().cloned().unwrap_or_else(Span::none)
    }

    /// The owning supervisor's handle.
    pub fn parent(&self) -> Option<TaskHandle> {
        self.core
            .parent
            .get()
            .and_then(Weak::upgrade)
            .map(|core| TaskHandle { core })
    }

    /// When the current (or last) start attempt began.
    pub fn start_time(&self) -> Option<Instant> {
        *self.core.start_time.lock()
    }

    /// Non-owning reference.
    pub fn downgrade(&self) -> WeakTaskHandle {
        WeakTaskHandle(Arc::downgrade(&self.core))
    }

    /// True if both handles refer to the same task.
    pub fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    // ---- Stop ----

    /// Stops the task with `reason`. Only the first reason is kept.
    ///
    /// Returns `true` if this call recorded the reason.
    pub fn stop(&self, reason: TaskError) -> bool {
        let token = {
            let mut life = self.core.life.lock();
            match &life.token {
                Some(token) => token.clone(),
                None => {
                    if life.pending_stop.is_some() {
                        return false;
                    }
                    life.pending_stop = Some(reason);
                    return true;
                }
            }
        };
        let label = reason.as_label();
        let stopped = token.stop(reason);
        if stopped && self.kind() != TaskKind::Call {
            let elapsed = self.start_time().map(|t| t.elapsed());
            tracing::debug!(
                parent: &self.span(),
                reason = label,
                ?elapsed,
                task_id = self.id(),
                task_type = self.kind().as_label(),
                owner_type = self.owner_type(),
                "task stop"
            );
        }
        stopped
    }

    /// True once the task (or an ancestor scope) was stopped.
    pub fn is_stopped(&self) -> bool {
        let life = self.core.life.lock();
        match &life.token {
            Some(token) => token.is_stopped(),
            None => life.pending_stop.is_some(),
        }
    }

    /// The recorded stop reason, `None` while running.
    pub fn stop_reason(&self) -> Option<TaskError> {
        let life = self.core.life.lock();
        if let Some(reason) = &life.concluded {
            return Some(reason.clone());
        }
        match &life.token {
            Some(token) => token.reason(),
            None => life.pending_stop.clone(),
        }
    }

    // ---- Waiting ----

    /// Waits for the final outcome of the start routine (retries included).
    ///
    /// Resolves early with the stop reason if the task is stopped before it started,
    /// e.g. when its supervisor was already stopped at admission.
    pub async fn wait_started(&self) -> Result<(), TaskError> {
        loop {
            let (token, started) = {
                let life = self.core.life.lock();
                (life.token.clone(), Arc::clone(&life.started))
            };
            if let Some(outcome) = started.try_get() {
                return outcome;
            }
            let Some(token) = token else {
                return started.wait().await;
            };
            tokio::select! {
                biased;
                outcome = started.wait() => return outcome,
                _ = token.stopped() => {}
            }
            if let Some(outcome) = started.try_get() {
                return outcome;
            }
            // A retry swapped in a fresh scope; keep waiting on it.
            let replaced = self
                .core
                .life
                .lock()
                .token
                .as_ref()
                .is_some_and(|cur| !cur.same_scope(&token));
            if replaced {
                continue;
            }
            return Err(token.reason().unwrap_or(TaskError::Canceled));
        }
    }

    /// Waits until the task is disposed and returns its stop reason.
    ///
    /// If the task never started, returns the start error instead.
    pub async fn wait_stopped(&self) -> TaskError {
        if let Err(e) = self.wait_started().await {
            return e;
        }
        let stopped = Arc::clone(&self.core.life.lock().stopped);
        stopped.wait().await
    }

    // ---- Listeners ----

    /// Registers a listener fired after each successful start.
    pub fn on_start<F>(&self, f: F)
    where
        F: Fn(&TaskHandle) + Send + Sync + 'static,
    {
        self.core.listeners.lock().start.push(Arc::new(f));
    }

    /// Registers a listener fired when dispose begins.
    pub fn on_before_dispose<F>(&self, f: F)
    where
        F: Fn(&TaskHandle) + Send + Sync + 'static,
    {
        self.core.listeners.lock().before_dispose.push(Arc::new(f));
    }

    /// Registers a listener fired after dispose, once `stopped` is fulfilled.
    pub fn on_dispose<F>(&self, f: F)
    where
        F: Fn(&TaskHandle) + Send + Sync + 'static,
    {
        self.core.listeners.lock().dispose.push(Arc::new(f));
    }

    /// Stops `self` with `other`'s stop reason once `other` is disposed.
    pub fn depend(&self, other: &TaskHandle) {
        let me = self.downgrade();
        other.on_dispose(move |dep| {
            if let Some(me) = me.upgrade() {
                me.stop(dep.stop_reason().unwrap_or(TaskError::Canceled));
            }
        });
    }

    // ---- Retry ----

    /// Retries performed since the last successful start.
    pub fn retry_count(&self) -> u32 {
        self.core.retry_count.load(Ordering::Acquire)
    }

    /// Replaces the retry policy.
    pub fn set_retry(&self, policy: RetryPolicy) {
        *self.core.retry.lock() = Some(policy);
    }

    /// Effective retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.core.retry.lock().unwrap_or_default()
    }

    // ---- Descriptions ----

    /// Sets a free-form description entry (shown by diagnostics).
    pub fn set_description(&self, key: impl Into<String>, value: impl ToString) {
        self.core
            .descriptions
            .lock()
            .insert(key.into(), value.to_string());
    }

    /// Removes a description entry.
    pub fn remove_description(&self, key: &str) {
        self.core.descriptions.lock().remove(key);
    }

    /// Snapshot of the description entries, including `ownerType`, `taskId` and `level`.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        let mut out = self.core.descriptions.lock().clone();
        out.insert("ownerType".into(), self.owner_type().to_string());
        out.insert("taskId".into(), self.id().to_string());
        out.insert("level".into(), self.level().to_string());
        out
    }

    // ---- Crate internals ----

    pub(crate) fn runtime(&self) -> Option<&Arc<Runtime>> {
        self.core.runtime.get()
    }

    /// Event of `kind` stamped with this task's label and id.
    pub(crate) fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_task(Arc::clone(&self.core.owner), self.id())
    }

    pub(crate) fn publish(&self, ev: Event) {
        if let Some(rt) = self.runtime() {
            rt.bus.publish(ev);
        }
    }

    pub(crate) fn supervisor_core(&self) -> Option<&Arc<SupervisorCore>> {
        match &self.core.behavior {
            Behavior::Supervisor(core) => Some(core),
            _ => None,
        }
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.core.state.store(state as u8, Ordering::Release);
    }

    /// Moves into `next` if the current state satisfies `allowed`.
    pub(crate) fn transition(&self, allowed: impl Fn(TaskState) -> bool, next: TaskState) -> bool {
        self.core
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                allowed(TaskState::from_u8(cur)).then_some(next as u8)
            })
            .is_ok()
    }

    pub(crate) fn mark_start_time(&self) -> Instant {
        let now = Instant::now();
        *self.core.start_time.lock() = Some(now);
        now
    }

    pub(crate) fn start_timeout(&self) -> Option<Duration> {
        self.core.start_timeout.lock().filter(|t| !t.is_zero())
    }

    pub(crate) fn bump_retry(&self) -> u32 {
        self.core.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_retry(&self) {
        self.core.retry_count.store(0, Ordering::Release);
    }

    /// Scope every lifecycle token of this task derives from.
    pub(crate) fn parent_scope(&self) -> Option<&StopToken> {
        self.core.parent_scope.get()
    }

    /// Current lifecycle token.
    pub(crate) fn token(&self) -> Option<StopToken> {
        self.core.life.lock().token.clone()
    }

    pub(crate) fn context(&self) -> Option<TaskContext> {
        let token = self.token()?;
        Some(TaskContext::new(self.clone(), token, self.span()))
    }

    pub(crate) fn started_promise(&self) -> Arc<Promise<Result<(), TaskError>>> {
        Arc::clone(&self.core.life.lock().started)
    }

    pub(crate) fn stopped_promise(&self) -> Arc<Promise<TaskError>> {
        Arc::clone(&self.core.life.lock().stopped)
    }

    /// Installs a fresh token for the next start attempt and returns the previous one.
    pub(crate) fn renew_token(&self) -> Option<StopToken> {
        let scope = self.parent_scope()?.child();
        self.core.life.lock().token.replace(scope)
    }

    /// Overrides the stop reason reported from now on, e.g. with `RetryExhausted` once a
    /// stopped task will not respawn.
    pub(crate) fn conclude(&self, reason: TaskError) {
        self.core.life.lock().concluded = Some(reason);
    }

    /// Fresh token and promises for a respawn after dispose.
    pub(crate) fn reset_lifecycle(&self) {
        let Some(scope) = self.parent_scope().map(StopToken::child) else {
            return;
        };
        *self.core.life.lock() = Life::fresh(Some(scope));
        self.set_state(TaskState::Init);
    }

    /// True for a tree root (never bound to a parent).
    pub(crate) fn is_root(&self) -> bool {
        self.core.parent.get().is_none()
    }

    /// True if `sup` is the supervisor that owns (and disposes) this task.
    pub(crate) fn is_owned_by(&self, sup: &TaskHandle) -> bool {
        self.core
            .parent
            .get()
            .is_some_and(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(&sup.core)))
    }

    /// First admission: binds the task to `parent`, assigns its id and creates its scope.
    ///
    /// Returns `false` when the handle already belongs to another supervisor.
    pub(crate) fn bind(&self, parent: &TaskHandle) -> bool {
        if self
            .core
            .parent
            .set(Arc::downgrade(&parent.core))
            .is_err()
        {
            return self.is_owned_by(parent);
        }
        let Some(parent_token) = parent.token() else {
            return true;
        };
        let runtime = parent.runtime().cloned();
        let scope = self
            .core
            .custom_scope
            .clone()
            .unwrap_or_else(|| parent_token.clone());
        self.init(scope, parent.level().saturating_add(1), runtime, Some(&parent.span()));
        true
    }

    /// Initializes a root (no parent).
    pub(crate) fn init_root(&self, runtime: Arc<Runtime>) {
        self.init(StopToken::new(), 0, Some(runtime), None);
    }

    fn init(
        &self,
        scope: StopToken,
        level: u8,
        runtime: Option<Arc<Runtime>>,
        parent_span: Option<&Span>,
    ) {
        if self.id() == 0 {
            self.core
                .id
                .store(TASK_ID.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Release);
        }
        self.core.level.store(level, Ordering::Relaxed);
        if let Some(rt) = runtime {
            let mut retry = self.core.retry.lock();
            if retry.is_none() {
                *retry = Some(rt.cfg.retry);
            }
            let mut timeout = self.core.start_timeout.lock();
            if timeout.is_none() {
                *timeout = rt.cfg.default_start_timeout();
            }
            drop((retry, timeout));
            let _ = self.core.runtime.set(rt);
        }

        let span = self.core.requested_span.lock().take().unwrap_or_else(|| {
            let owner = &*self.core.owner;
            match parent_span {
                Some(parent) => tracing::debug_span!(
                    parent: parent,
                    "task",
                    owner_type = owner,
                    task_id = self.id()
                ),
                None => tracing::info_span!("task", owner_type = owner, task_id = self.id()),
            }
        });
        let _ = self.core.span.set(span);

        let token = scope.child();
        let _ = self.core.parent_scope.set(scope);
        let pending = {
            let mut life = self.core.life.lock();
            life.token = Some(token);
            life.pending_stop.take()
        };
        if let Some(reason) = pending {
            self.stop(reason);
        }
    }

    pub(crate) fn fire_start(&self) {
        let listeners = self.core.listeners.lock().start.clone();
        for l in listeners {
            l(self);
        }
    }

    pub(crate) fn fire_before_dispose(&self) {
        let listeners = self.core.listeners.lock().before_dispose.clone();
        for l in listeners {
            l(self);
        }
    }

    pub(crate) fn fire_dispose(&self) {
        let listeners = self.core.listeners.lock().dispose.clone();
        for l in listeners {
            l(self);
        }
    }

    /// Stream produced by a channel task's last successful start.
    pub(crate) fn take_tick_stream(&self) -> Option<TickStream> {
        match &self.core.behavior {
            Behavior::Channel { pending, .. } => pending.lock().take(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("owner_type", &self.owner_type())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}
