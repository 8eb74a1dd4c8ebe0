use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::Span;

use crate::config::RuntimeConfig;
use crate::core::event_loop;
use crate::core::handle::{Behavior, HandleOptions, TaskHandle, TaskKind, TaskState};
use crate::core::supervisor::{Runtime, Supervisor, SupervisorCore};
use crate::events::Bus;
use crate::subscribers::{AliveTracker, Subscribe, SubscriberSet};

/// Builder for root and child supervisors.
pub struct SupervisorBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    keep_alive: Option<bool>,
    owner: Arc<str>,
    span: Option<Span>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            keep_alive: None,
            owner: "Supervisor".into(),
            span: None,
        }
    }

    /// Sets event subscribers (root only).
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    /// An [`AliveTracker`] is always added.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Keeps the supervisor running without children.
    ///
    /// Defaults to `true` for a root and `false` for a child.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Overrides the owner-type label (default `"Supervisor"`).
    pub fn with_owner_type(mut self, owner: impl Into<Arc<str>>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Uses `span` instead of a derived one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the root of a new tree and spawns its loop.
    ///
    /// Initializes the event bus, the subscriber workers (plus the fan-out listener feeding
    /// them) and the alive tracker. Must be called inside a tokio runtime.
    pub fn build_root(self) -> Supervisor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let alive = Arc::new(AliveTracker::new());
        let mut subs = self.subscribers;
        subs.push(alive.clone());
        let set = SubscriberSet::new(subs, bus.clone());
        let runtime = Arc::new(Runtime::new(self.cfg, bus, alive));
        subscriber_listener(&runtime, set);

        let core = Arc::new(SupervisorCore::new(self.keep_alive.unwrap_or(true)));
        let handle = TaskHandle::new(
            TaskKind::Supervisor,
            self.owner,
            Behavior::Supervisor(Arc::clone(&core)),
            HandleOptions {
                span: self.span,
                ..HandleOptions::default()
            },
        );
        handle.init_root(runtime);
        handle.mark_start_time();
        handle.set_state(TaskState::Started);
        handle.started_promise().fulfill(Ok(()));

        if let Some(rx) = core.take_receiver() {
            event_loop::spawn(handle.clone(), Arc::clone(&core), rx);
        }
        Supervisor::from_parts(handle, core)
    }

    /// Builds a child of `parent`. It joins `parent` lazily, on its own first child.
    ///
    /// The runtime (config, bus, subscribers) is inherited; `with_subscribers` is ignored.
    pub fn build_under(self, parent: &Supervisor) -> Supervisor {
        let core = Arc::new(SupervisorCore::new(self.keep_alive.unwrap_or(false)));
        let handle = TaskHandle::new(
            TaskKind::Supervisor,
            self.owner,
            Behavior::Supervisor(Arc::clone(&core)),
            HandleOptions {
                span: self.span,
                ..HandleOptions::default()
            },
        );
        handle.bind(parent.handle());
        Supervisor::from_parts(handle, core)
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
///
/// Exits once the tree published its last event, draining what is left.
fn subscriber_listener(runtime: &Arc<Runtime>, set: SubscriberSet) {
    let mut rx = runtime.bus.subscribe();
    let rt = Arc::clone(runtime);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = rt.closing.wait() => {
                    while let Ok(ev) = rx.try_recv() {
                        set.emit(&ev);
                    }
                    break;
                }
            }
        }
        drop(rt);
        set.shutdown().await;
    });
}
