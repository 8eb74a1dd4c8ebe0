//! # Supervisor: a task that owns children and runs their event loop.
//!
//! A [`Supervisor`] admits child tasks through an unbounded queue, starts them inline on its
//! loop, multiplexes their stop signals (and channel ticks), disposes the ones it owns and
//! stops itself once empty unless kept alive.
//!
//! ## Architecture
//! ```text
//! add(handle) ──► bind (parent, id, scope, span) ──► admission queue ──► event loop
//!                                                                         │
//!     ┌─────────────────────────────── select! ──────────────────────────┤
//!     │ own stop token      → shutdown: reject queued, stop all children, │
//!     │                       dispose owned, fulfill loop_done            │
//!     │ admission           → start_task inline, register signal stream   │
//!     │ child signal        → Tick: run callback │ Stopped: dispose,      │
//!     │                       respawn per retry policy or deregister      │
//!     └── after each step: no children && !keep_alive → stop(AutoStop) ──┘
//! ```
//!
//! ## Rules
//! - A child supervisor starts its loop on its first admission and only then joins its parent.
//! - Admission into a stopped supervisor rejects the task with the supervisor's stop reason.
//! - Stopping a supervisor stops every descendant with the same reason; only the direct owner
//!   disposes a task.
//!
//! ## Example
//! ```rust
//! use streamvisor::{RuntimeConfig, Supervisor, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let root = Supervisor::builder(RuntimeConfig::default()).build_root();
//!
//!     root.call(|| Ok(())).await.unwrap();
//!     root.shutdown();
//!     assert_eq!(root.wait_stopped().await, TaskError::Exit);
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RuntimeConfig;
use crate::core::builder::SupervisorBuilder;
use crate::core::handle::{Listener, TaskHandle};
use crate::core::{event_loop, lifecycle, shutdown};
use crate::error::{RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::AliveTracker;
use crate::sync::{Promise, StopToken};
use crate::tasks::{Task, TaskContext, TaskSpec};

/// State shared by every task of one tree.
pub(crate) struct Runtime {
    pub(crate) cfg: RuntimeConfig,
    pub(crate) bus: Bus,
    pub(crate) alive: Arc<AliveTracker>,
    /// Fulfilled once the last event of the tree was published.
    pub(crate) closing: Promise<()>,
    graceful: AtomicBool,
}

impl Runtime {
    pub(crate) fn new(cfg: RuntimeConfig, bus: Bus, alive: Arc<AliveTracker>) -> Self {
        Self {
            cfg,
            bus,
            alive,
            closing: Promise::new(),
            graceful: AtomicBool::new(false),
        }
    }

    /// Called by the root loop after it disposed itself.
    pub(crate) fn root_disposed(&self) {
        if !self.graceful.load(Ordering::Acquire) {
            self.closing.fulfill(());
        }
    }
}

/// Supervisor part of a task's behaviour.
pub(crate) struct SupervisorCore {
    keep_alive: AtomicBool,
    tx: mpsc::UnboundedSender<TaskHandle>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<TaskHandle>>>,
    loop_done: Promise<()>,
    child_dispose: Mutex<Vec<Listener>>,
    children: Mutex<Vec<TaskHandle>>,
    blocked: Mutex<Option<TaskHandle>>,
}

impl SupervisorCore {
    pub(crate) fn new(keep_alive: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            keep_alive: AtomicBool::new(keep_alive),
            tx,
            rx: Mutex::new(Some(rx)),
            loop_done: Promise::new(),
            child_dispose: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            blocked: Mutex::new(None),
        }
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }

    /// The admission receiver, handed out once to the loop.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<TaskHandle>> {
        self.rx.lock().take()
    }

    pub(crate) async fn loop_done(&self) {
        self.loop_done.wait().await
    }

    pub(crate) fn finish_loop(&self) {
        self.loop_done.fulfill(());
    }

    /// Mirrors the loop's child list for readers outside the loop.
    pub(crate) fn track_children(&self, children: &[TaskHandle]) {
        *self.children.lock() = children.to_vec();
    }

    pub(crate) fn set_blocked(&self, task: Option<TaskHandle>) {
        *self.blocked.lock() = task;
    }

    fn walk(&self, depth: usize, f: &mut dyn FnMut(&TaskHandle, usize)) {
        let children = self.children.lock().clone();
        for child in &children {
            f(child, depth);
            if let Some(core) = child.supervisor_core() {
                core.walk(depth + 1, f);
            }
        }
    }

    pub(crate) fn fire_child_dispose(&self, child: &TaskHandle) {
        let listeners = self.child_dispose.lock().clone();
        for l in listeners {
            l(child);
        }
    }
}

/// Handle to a supervising task.
///
/// Cloning is cheap; all clones drive the same loop.
#[derive(Clone)]
pub struct Supervisor {
    handle: TaskHandle,
    core: Arc<SupervisorCore>,
}

impl Supervisor {
    /// Starts building a root supervisor.
    pub fn builder(cfg: RuntimeConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn from_parts(handle: TaskHandle, core: Arc<SupervisorCore>) -> Self {
        Self { handle, core }
    }

    /// Views `handle` as a supervisor, if it is one.
    pub fn from_handle(handle: TaskHandle) -> Option<Self> {
        let core = Arc::clone(handle.supervisor_core()?);
        Some(Self { handle, core })
    }

    /// The supervisor's own task handle.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Shortcut for `handle().id()`.
    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    /// True when the supervisor never stops on its own.
    pub fn is_keep_alive(&self) -> bool {
        self.core.keep_alive()
    }

    // ---- Admission ----

    /// Admits a pre-built handle and returns it.
    ///
    /// The first supervisor a handle is added to becomes its owner; adding it elsewhere only
    /// registers it there for stop cascades.
    pub fn add(&self, task: TaskHandle) -> TaskHandle {
        task.bind(&self.handle);
        if self.handle.is_stopped() {
            lifecycle::reject(&task, self.stop_reason_or_canceled());
            return task;
        }
        self.ensure_running();
        if let Err(mpsc::error::SendError(task)) = self.core.tx.send(task.clone()) {
            lifecycle::reject(&task, self.stop_reason_or_canceled());
        }
        task
    }

    /// Admits a task built from a full [`TaskSpec`].
    pub fn spawn(&self, spec: TaskSpec) -> TaskHandle {
        self.add(spec.into_handle())
    }

    /// Admits a [`Task`] implementation with default options.
    pub fn add_task<T: Task>(&self, task: T) -> TaskHandle {
        self.spawn(TaskSpec::new(task))
    }

    /// Admits a task whose scope derives from `scope` instead of this supervisor.
    pub fn add_task_with_context<T: Task>(&self, scope: StopToken, task: T) -> TaskHandle {
        self.spawn(TaskSpec::new(task).with_scope(scope))
    }

    /// Creates a child supervisor that joins this one on its first child.
    pub fn new_child(&self) -> Supervisor {
        SupervisorBuilder::default().build_under(self)
    }

    /// Runs `f` on the loop and waits for its result.
    ///
    /// # Example
    /// ```rust
    /// # use streamvisor::{RuntimeConfig, Supervisor, TaskError};
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let root = Supervisor::builder(RuntimeConfig::default()).build_root();
    /// let err = root.call(|| Err(TaskError::fatal("bad input"))).await;
    /// assert_eq!(err, Err(TaskError::fatal("bad input")));
    /// # }
    /// ```
    pub async fn call<F>(&self, f: F) -> Result<(), TaskError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        let handle = self.spawn(TaskSpec::call(once(f)));
        match handle.wait_started().await {
            Ok(()) | Err(TaskError::CallbackComplete) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Runs `f` on the loop without waiting.
    pub fn post<F>(&self, f: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut f = Some(f);
        self.spawn(TaskSpec::call(move || {
            if let Some(f) = f.take() {
                f();
            }
            Ok(())
        }))
    }

    /// Admits a callback task; with `dispose` it stays registered until stopped.
    pub fn add_call<S, D>(&self, start: S, dispose: Option<D>) -> TaskHandle
    where
        S: FnMut() -> Result<(), TaskError> + Send + 'static,
        D: FnMut() + Send + 'static,
    {
        self.spawn(TaskSpec::callback(start, dispose))
    }

    /// Admits a channel task over `stream`: `on_item` runs on the loop for every item.
    ///
    /// The stream is consumed by the first lifecycle, so the task is never retried.
    pub fn add_chan<St, T, C>(&self, stream: St, on_item: C) -> TaskHandle
    where
        St: Stream<Item = T> + Send + 'static,
        T: Send + 'static,
        C: FnMut(T) + Send + 'static,
    {
        let mut stream = Some(stream);
        self.spawn(TaskSpec::channel(
            move |_ctx: &TaskContext| {
                stream
                    .take()
                    .ok_or_else(|| TaskError::fatal("channel stream already consumed"))
            },
            on_item,
        ))
    }

    /// Admits a channel task ticking every `period`; missed ticks are skipped.
    pub fn add_timer<C>(&self, period: Duration, on_tick: C) -> TaskHandle
    where
        C: FnMut(Instant) + Send + 'static,
    {
        let spec = TaskSpec::channel(
            move |_ctx: &TaskContext| {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ok(futures::stream::unfold(interval, |mut iv| async move {
                    let at = iv.tick().await;
                    Some((at, iv))
                }))
            },
            on_tick,
        )
        .with_owner_type("TimerTask");
        self.spawn(spec)
    }

    /// Live children in admission order, including observed (not owned) handles.
    pub fn children(&self) -> Vec<TaskHandle> {
        self.core.children.lock().clone()
    }

    /// Visits every live descendant depth-first with its depth (`1` for a direct child).
    pub fn walk_children<F>(&self, mut f: F)
    where
        F: FnMut(&TaskHandle, usize),
    {
        self.core.walk(1, &mut f);
    }

    /// The child whose start routine the loop is awaiting right now.
    ///
    /// Starts run inline, so while this is `Some` no other admission or child signal of
    /// this supervisor is processed.
    pub fn blocked(&self) -> Option<TaskHandle> {
        self.core.blocked.lock().clone()
    }

    /// Registers a listener fired whenever any descendant is disposed.
    pub fn on_child_dispose<F>(&self, f: F)
    where
        F: Fn(&TaskHandle) + Send + Sync + 'static,
    {
        self.core.child_dispose.lock().push(Arc::new(f));
    }

    // ---- Stop ----

    /// Stops the supervisor (and its subtree) with `reason`.
    pub fn stop(&self, reason: TaskError) -> bool {
        self.handle.stop(reason)
    }

    /// Stops the supervisor with [`TaskError::Exit`].
    pub fn shutdown(&self) -> bool {
        self.stop(TaskError::Exit)
    }

    /// Waits until the supervisor is disposed.
    pub async fn wait_stopped(&self) -> TaskError {
        self.handle.wait_stopped().await
    }

    /// Stops the tree with [`TaskError::Exit`] and waits up to the configured grace period.
    ///
    /// Publishes `ShutdownRequested`, then `AllStoppedWithin` or `GraceExceeded`. On timeout
    /// returns the live tasks reported by the [`AliveTracker`].
    pub async fn shutdown_with_grace(&self) -> Result<(), RuntimeError> {
        let Some(rt) = self.handle.runtime().cloned() else {
            self.shutdown();
            return Ok(());
        };
        rt.graceful.store(true, Ordering::Release);
        rt.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.shutdown();

        let grace = rt.cfg.grace;
        let res = match tokio::time::timeout(grace, self.wait_stopped()).await {
            Ok(_) => {
                rt.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck = rt.alive.snapshot().await;
                rt.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };
        rt.closing.fulfill(());
        res
    }

    /// Adds a channel task that stops this supervisor with [`TaskError::Exit`] on
    /// SIGHUP, SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere).
    pub fn listen_os_signals(&self) -> std::io::Result<TaskHandle> {
        let signals = shutdown::signal_stream()?;
        let root = self.handle.downgrade();
        let handle = self.add_chan(signals, move |signal| {
            tracing::info!(signal, "shutdown signal");
            if let Some(root) = root.upgrade() {
                if let Some(rt) = root.runtime() {
                    rt.bus.publish(Event::new(EventKind::ShutdownRequested).with_reason(signal));
                }
                root.stop(TaskError::Exit);
            }
        });
        Ok(handle)
    }

    // ---- Observability ----

    /// Live task tracker of this tree.
    pub fn alive(&self) -> Option<Arc<AliveTracker>> {
        self.handle.runtime().map(|rt| Arc::clone(&rt.alive))
    }

    /// Raw receiver of this tree's events.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        self.handle.runtime().map(|rt| rt.bus.subscribe())
    }

    fn stop_reason_or_canceled(&self) -> TaskError {
        self.handle.stop_reason().unwrap_or(TaskError::Canceled)
    }

    /// Spawns the loop on first use; a child then joins its parent.
    fn ensure_running(&self) {
        let Some(rx) = self.core.take_receiver() else {
            return;
        };
        event_loop::spawn(self.handle.clone(), Arc::clone(&self.core), rx);
        if let Some(parent) = self.handle.parent().and_then(Supervisor::from_handle) {
            parent.add(self.handle.clone());
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("handle", &self.handle)
            .field("keep_alive", &self.core.keep_alive())
            .finish()
    }
}

/// Adapts a `FnOnce` to the `FnMut` a callback task stores.
fn once<F>(f: F) -> impl FnMut() -> Result<(), TaskError> + Send + 'static
where
    F: FnOnce() -> Result<(), TaskError> + Send + 'static,
{
    let mut f = Some(f);
    move || match f.take() {
        Some(f) => f(),
        None => Err(TaskError::fatal("call already executed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::policies::RetryPolicy;
    use crate::tasks::TaskFn;

    const GUARD: Duration = Duration::from_secs(5);

    fn root() -> Supervisor {
        Supervisor::builder(RuntimeConfig::default()).build_root()
    }

    fn idle(owner: &'static str) -> TaskSpec {
        TaskSpec::from_arc(TaskFn::arc(owner, |ctx: TaskContext| async move {
            ctx.stopped().await;
            Ok::<_, TaskError>(())
        }))
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct Recorder {
        log: Log,
    }

    #[async_trait]
    impl Task for Recorder {
        async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            self.log.lock().push("start");
            Ok(())
        }

        async fn dispose(&self, _reason: &TaskError) {
            self.log.lock().push("dispose");
        }
    }

    struct Flaky {
        starts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Task for Flaky {
        async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::fail("origin unreachable"))
        }
    }

    struct SlowFirstStart {
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Task for SlowFirstStart {
        async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            let attempt = {
                let mut starts = self.starts.lock();
                starts.push(Instant::now());
                starts.len()
            };
            if attempt == 1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(TaskError::fail("handshake"));
            }
            Ok(())
        }
    }

    struct Gated(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl Task for Gated {
        async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            self.0.notified().await;
            Ok(())
        }
    }

    async fn eventually(cond: impl Fn() -> bool) {
        timeout(GUARD, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Signals `tx` from an `on_dispose` listener, which runs after `stopped` is fulfilled.
    fn disposed_signal(handle: &TaskHandle) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.on_dispose(move |_| {
            let _ = tx.send(());
        });
        rx
    }

    #[tokio::test]
    async fn hooks_fire_in_lifecycle_order() {
        let root = root();
        let log: Log = Arc::default();
        let handle = TaskSpec::new(Recorder { log: log.clone() }).into_handle();
        let l = log.clone();
        handle.on_start(move |_| l.lock().push("on_start"));
        let l = log.clone();
        handle.on_before_dispose(move |_| l.lock().push("before_dispose"));
        let l = log.clone();
        handle.on_dispose(move |_| l.lock().push("on_dispose"));
        let mut disposed = disposed_signal(&handle);

        root.add(handle.clone());
        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();
        assert!(handle.id() > 0);
        assert_eq!(handle.level(), 1);

        handle.stop(TaskError::Exit);
        assert_eq!(timeout(GUARD, handle.wait_stopped()).await.unwrap(), TaskError::Exit);
        timeout(GUARD, disposed.recv()).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["start", "on_start", "before_dispose", "dispose", "on_dispose"]
        );
    }

    #[tokio::test]
    async fn call_runs_on_the_loop() {
        let root = root();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let res = root
            .call(move || {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(res, Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let res = timeout(GUARD, root.call(|| Err(TaskError::fail("bad")))).await.unwrap();
        assert_eq!(res, Err(TaskError::fail("bad")));
    }

    #[tokio::test]
    async fn retry_ceiling_wraps_last_error() {
        let root = root();
        let starts = Arc::new(AtomicU32::new(0));
        let spec = TaskSpec::new(Flaky { starts: starts.clone() })
            .with_retry(RetryPolicy::limited(3, Duration::from_millis(1)));
        let handle = root.spawn(spec);

        let err = timeout(GUARD, handle.wait_started()).await.unwrap().unwrap_err();
        assert!(matches!(err, TaskError::RetryExhausted { .. }));
        assert_eq!(err.root_cause(), &TaskError::fail("origin unreachable"));
        assert_eq!(handle.retry_count(), 3);
        // first attempt plus three retries
        assert_eq!(starts.load(Ordering::SeqCst), 4);
        assert_eq!(timeout(GUARD, handle.wait_stopped()).await.unwrap(), err);
    }

    #[tokio::test]
    async fn fatal_start_error_is_not_retried() {
        let root = root();
        let starts = Arc::new(AtomicU32::new(0));
        let s = starts.clone();
        let handle = root.spawn(
            TaskSpec::callback(
                move || {
                    s.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::fatal("bad url"))
                },
                Some(|| {}),
            )
            .with_retry(RetryPolicy::unlimited(Duration::from_millis(1))),
        );
        let err = timeout(GUARD, handle.wait_started()).await.unwrap();
        assert_eq!(err, Err(TaskError::fatal("bad url")));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let root = root();
        let handle = root.spawn(idle("Idle"));
        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();

        assert!(handle.stop(TaskError::Exit));
        assert!(!handle.stop(TaskError::Complete));
        assert_eq!(handle.stop_reason(), Some(TaskError::Exit));
        assert_eq!(timeout(GUARD, handle.wait_stopped()).await.unwrap(), TaskError::Exit);
    }

    #[tokio::test]
    async fn stop_cascades_reason_to_descendants() {
        let root = root();
        let child = root.new_child();
        let grandchild = child.new_child();
        let leaf = grandchild.spawn(idle("Leaf"));
        let sibling = child.spawn(idle("Sibling"));
        timeout(GUARD, leaf.wait_started()).await.unwrap().unwrap();
        timeout(GUARD, sibling.wait_started()).await.unwrap().unwrap();
        assert_eq!(leaf.level(), 3);

        let reason = TaskError::fatal("upstream gone");
        child.stop(reason.clone());
        assert_eq!(timeout(GUARD, leaf.wait_stopped()).await.unwrap(), reason);
        assert_eq!(timeout(GUARD, sibling.wait_stopped()).await.unwrap(), reason);
        assert_eq!(timeout(GUARD, child.wait_stopped()).await.unwrap(), reason);
        assert_eq!(grandchild.handle().stop_reason(), Some(reason));
        assert!(!root.handle().is_stopped());
    }

    #[tokio::test]
    async fn empty_child_supervisor_auto_stops() {
        let root = root();
        let child = root.new_child();
        let only = child.spawn(idle("Only"));
        timeout(GUARD, only.wait_started()).await.unwrap().unwrap();

        only.stop(TaskError::Complete);
        assert_eq!(timeout(GUARD, child.wait_stopped()).await.unwrap(), TaskError::AutoStop);
        assert!(!root.handle().is_stopped());
    }

    #[tokio::test]
    async fn owned_children_dispose_before_their_supervisor() {
        let root = root();
        let child = root.new_child();
        let log: Log = Arc::default();
        for name in ["a", "b"] {
            let log = log.clone();
            let handle = child.add_call(|| Ok(()), Some(move || log.lock().push(name)));
            timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();
        }
        let mut disposed = disposed_signal(child.handle());
        let log_end = log.clone();
        child.on_child_dispose(move |_| log_end.lock().push("child-listener"));

        child.shutdown();
        assert_eq!(timeout(GUARD, child.wait_stopped()).await.unwrap(), TaskError::Exit);
        timeout(GUARD, disposed.recv()).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["child-listener", "a", "child-listener", "b"]
        );
    }

    #[tokio::test]
    async fn admission_into_stopped_supervisor_is_rejected() {
        let root = root();
        let child = root.new_child();
        let first = child.spawn(idle("First"));
        timeout(GUARD, first.wait_started()).await.unwrap().unwrap();
        child.stop(TaskError::Exit);
        timeout(GUARD, child.wait_stopped()).await.unwrap();

        let late = child.spawn(idle("Late"));
        assert_eq!(
            timeout(GUARD, late.wait_started()).await.unwrap(),
            Err(TaskError::Exit)
        );
        assert_eq!(timeout(GUARD, late.wait_stopped()).await.unwrap(), TaskError::Exit);
    }

    #[tokio::test]
    async fn channel_ticks_keep_task_registered() {
        let root = root();
        let (tx, rx) = futures::channel::mpsc::unbounded::<u32>();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handle = root.add_chan(rx, move |v| {
            let _ = seen_tx.send(v);
        });
        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();

        for v in 1..=3 {
            tx.unbounded_send(v).unwrap();
        }
        for expected in 1..=3 {
            assert_eq!(timeout(GUARD, seen_rx.recv()).await.unwrap(), Some(expected));
        }
        assert!(!handle.is_stopped());
        assert!(seen_rx.try_recv().is_err());

        drop(tx);
        assert_eq!(timeout(GUARD, handle.wait_stopped()).await.unwrap(), TaskError::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_once_per_period_until_stopped() {
        let root = root();
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        let period = Duration::from_millis(5);
        let timer = root.add_timer(period, move |_at| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        timeout(GUARD, timer.wait_started()).await.unwrap().unwrap();

        tokio::time::sleep(period * 3 + period / 2).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timer.is_stopped());

        timer.stop(TaskError::Complete);
        assert_eq!(timeout(GUARD, timer.wait_stopped()).await.unwrap(), TaskError::Complete);
        tokio::time::sleep(period * 4).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_run_hook_respawns() {
        let root = root();
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        let spec = TaskSpec::from_arc(TaskFn::arc("Puller", move |_ctx: TaskContext| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TaskError::fail("connection reset"))
            }
        }))
        .with_retry(RetryPolicy::limited(2, Duration::from_millis(1)));
        let handle = root.spawn(spec);

        // every respawn starts successfully, which resets the retry counter
        timeout(GUARD, async {
            while runs.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        root.shutdown();
        assert_eq!(timeout(GUARD, root.wait_stopped()).await.unwrap(), TaskError::Exit);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn custom_scope_stops_task() {
        let root = root();
        let session = StopToken::new();
        let handle = root.spawn(idle("Session").with_scope(session.clone()));
        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();

        session.stop(TaskError::fatal("session closed"));
        assert_eq!(
            timeout(GUARD, handle.wait_stopped()).await.unwrap(),
            TaskError::fatal("session closed")
        );
    }

    #[tokio::test]
    async fn start_timeout_fails_attempt() {
        let root = root();
        let handle = root.spawn(
            TaskSpec::from_arc(Arc::new(Slow))
                .with_start_timeout(Duration::from_millis(10)),
        );
        let err = timeout(GUARD, handle.wait_started()).await.unwrap().unwrap_err();
        assert!(matches!(err, TaskError::Timeout { .. }));
    }

    struct Slow;

    #[async_trait]
    impl Task for Slow {
        async fn start(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_start_becomes_error() {
        let root = root();
        let handle = root.add_call(|| panic!("boom"), Some(|| {}));
        let err = timeout(GUARD, handle.wait_started()).await.unwrap().unwrap_err();
        assert_eq!(err, TaskError::Panic { message: "boom".into() });
    }

    #[tokio::test]
    async fn graceful_shutdown_reports_outcome() {
        let cfg = RuntimeConfig {
            grace: Duration::from_secs(2),
            ..RuntimeConfig::default()
        };
        let root = Supervisor::builder(cfg).build_root();
        let mut events = root.subscribe().unwrap();
        let handle = root.spawn(idle("Worker"));
        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();

        timeout(GUARD, root.shutdown_with_grace()).await.unwrap().unwrap();
        assert_eq!(handle.stop_reason(), Some(TaskError::Exit));

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::AllStoppedWithin));
    }

    #[tokio::test]
    async fn depend_stops_dependent() {
        let root = root();
        let source = root.spawn(idle("Source"));
        let sink = root.spawn(idle("Sink"));
        timeout(GUARD, sink.wait_started()).await.unwrap().unwrap();
        sink.depend(&source);

        source.stop(TaskError::fatal("source lost"));
        assert_eq!(
            timeout(GUARD, sink.wait_stopped()).await.unwrap(),
            TaskError::fatal("source lost")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_window_counts_from_attempt_start() {
        let root = root();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let spec = TaskSpec::new(SlowFirstStart { starts: starts.clone() })
            .with_retry(RetryPolicy::limited(3, Duration::from_millis(100)));
        let handle = root.spawn(spec);

        timeout(GUARD, handle.wait_started()).await.unwrap().unwrap();
        let starts = starts.lock().clone();
        assert_eq!(starts.len(), 2);
        // the first attempt failed 50ms in; the window still runs from its start
        assert_eq!(starts[1] - starts[0], Duration::from_millis(100));
        assert_eq!(handle.retry_count(), 0);
    }

    #[tokio::test]
    async fn respawn_past_the_limit_reports_retry_exhausted() {
        let root = root();
        let starts = Arc::new(AtomicU32::new(0));
        let handle = idle("Flapping")
            .with_retry(RetryPolicy::limited(2, Duration::from_millis(1)))
            .into_handle();
        let s = starts.clone();
        handle.on_start(move |h| {
            s.fetch_add(1, Ordering::SeqCst);
            h.stop(TaskError::fail("flap"));
        });
        root.add(handle.clone());

        eventually(|| starts.load(Ordering::SeqCst) >= 3).await;
        let reason = timeout(GUARD, handle.wait_stopped()).await.unwrap();
        assert_eq!(
            reason,
            TaskError::RetryExhausted {
                last: Box::new(TaskError::fail("flap"))
            }
        );
        assert_eq!(handle.stop_reason(), Some(reason));
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn walk_children_lists_the_live_tree() {
        let root = root();
        let ingest = root.spawn(idle("Ingest"));
        let players = root.new_child();
        let player = players.spawn(idle("Player"));
        timeout(GUARD, ingest.wait_started()).await.unwrap().unwrap();
        timeout(GUARD, player.wait_started()).await.unwrap().unwrap();
        eventually(|| root.children().len() == 2 && players.children().len() == 1).await;

        let mut seen = Vec::new();
        root.walk_children(|h, depth| seen.push((h.owner_type().to_string(), depth)));
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("Ingest".to_string(), 1),
                ("Player".to_string(), 2),
                ("Supervisor".to_string(), 1)
            ]
        );
        assert!(players.children()[0].ptr_eq(&player));

        ingest.stop(TaskError::Exit);
        eventually(|| root.children().len() == 1).await;
        assert!(root.children()[0].ptr_eq(players.handle()));
    }

    #[tokio::test]
    async fn blocked_names_the_start_holding_the_loop() {
        let root = root();
        let gate = Arc::new(tokio::sync::Notify::new());
        let slow = root.spawn(TaskSpec::new(Gated(gate.clone())));
        eventually(|| root.blocked().is_some_and(|b| b.ptr_eq(&slow))).await;

        let queued = root.spawn(idle("Queued"));
        assert!(timeout(Duration::from_millis(20), queued.wait_started()).await.is_err());

        gate.notify_one();
        timeout(GUARD, queued.wait_started()).await.unwrap().unwrap();
        assert!(slow.wait_started().await.is_ok());
        eventually(|| root.blocked().is_none()).await;
    }
}
