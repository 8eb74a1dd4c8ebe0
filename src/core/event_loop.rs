//! # Supervisor event loop.
//!
//! One spawned tokio task per supervisor. Every child contributes one signal stream to a
//! [`SelectAll`]; admissions arrive over the unbounded queue. All bookkeeping of the children
//! happens on this task, so it needs no locking.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream, SelectAll};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::core::handle::TaskHandle;
use crate::core::lifecycle::{self, RetryDecision, RetryPlan};
use crate::core::supervisor::SupervisorCore;
use crate::error::TaskError;
use crate::events::EventKind;

/// Item of a child's signal stream.
#[derive(Debug, Clone, Copy)]
enum Signal {
    /// A channel child's source yielded (its callback already ran).
    Tick(u32),
    /// The child's scope fired, or its source ended.
    Stopped(u32),
}

type Signals = SelectAll<BoxStream<'static, Signal>>;

pub(crate) fn spawn(
    sup: TaskHandle,
    core: Arc<SupervisorCore>,
    rx: mpsc::UnboundedReceiver<TaskHandle>,
) {
    let span = sup.span();
    tokio::spawn(run(sup, core, rx).instrument(span));
}

async fn run(
    sup: TaskHandle,
    core: Arc<SupervisorCore>,
    mut rx: mpsc::UnboundedReceiver<TaskHandle>,
) {
    let Some(token) = sup.token() else {
        core.finish_loop();
        return;
    };
    let mut children: Vec<TaskHandle> = Vec::new();
    let mut signals: Signals = SelectAll::new();
    tracing::debug!("supervisor loop started");

    loop {
        tokio::select! {
            biased;
            _ = token.stopped() => break,
            Some(task) = rx.recv() => {
                admit(&sup, &core, task, &mut children, &mut signals).await;
                core.track_children(&children);
            }
            Some(signal) = signals.next(), if !signals.is_empty() => {
                if on_signal(&sup, signal, &mut children, &mut signals).await {
                    core.track_children(&children);
                }
            }
        }
        if !core.keep_alive() && children.is_empty() && sup.stop(TaskError::AutoStop) {
            sup.publish(sup.event(EventKind::AutoStop));
        }
    }

    let reason = sup.stop_reason().unwrap_or(TaskError::Canceled);
    rx.close();
    while let Ok(task) = rx.try_recv() {
        lifecycle::reject(&task, reason.clone());
    }
    for child in &children {
        child.stop(reason.clone());
    }
    for child in children.iter().filter(|c| c.is_owned_by(&sup)) {
        stopped(child);
        lifecycle::dispose_task(child).await;
    }
    drop(signals);
    core.track_children(&[]);
    core.finish_loop();
    tracing::debug!(reason = reason.as_label(), "supervisor loop finished");

    if sup.is_root() {
        lifecycle::dispose_task(&sup).await;
        if let Some(rt) = sup.runtime() {
            rt.root_disposed();
        }
    }
}

async fn admit(
    sup: &TaskHandle,
    core: &SupervisorCore,
    task: TaskHandle,
    children: &mut Vec<TaskHandle>,
    signals: &mut Signals,
) {
    if task.is_owned_by(sup) {
        core.set_blocked(Some(task.clone()));
        let started = lifecycle::start_task(&task).await;
        core.set_blocked(None);
        if !started {
            return;
        }
    }
    register(task, children, signals);
}

fn register(task: TaskHandle, children: &mut Vec<TaskHandle>, signals: &mut Signals) {
    signals.push(signal_stream(&task));
    children.push(task);
}

/// `Stopped` once the child's scope fires; channel children first yield a `Tick` per item.
fn signal_stream(task: &TaskHandle) -> BoxStream<'static, Signal> {
    let id = task.id();
    let Some(token) = task.token() else {
        return stream::once(async move { Signal::Stopped(id) }).boxed();
    };
    match task.take_tick_stream() {
        Some(ticks) => ticks
            .map(move |()| Signal::Tick(id))
            .take_until(token.stopped_owned())
            .chain(stream::once(async move { Signal::Stopped(id) }))
            .boxed(),
        None => stream::once(token.stopped_owned())
            .map(move |()| Signal::Stopped(id))
            .boxed(),
    }
}

/// Handles one child signal; returns `true` if the child left the list.
async fn on_signal(
    sup: &TaskHandle,
    signal: Signal,
    children: &mut Vec<TaskHandle>,
    signals: &mut Signals,
) -> bool {
    let id = match signal {
        Signal::Tick(id) => {
            tracing::trace!(task_id = id, "tick");
            return false;
        }
        Signal::Stopped(id) => id,
    };
    let Some(child) = children.iter().find(|c| c.id() == id).cloned() else {
        return false;
    };
    if !child.is_stopped() {
        child.stop(TaskError::Complete);
    }
    if child.is_owned_by(sup) {
        stopped(&child);
        let reason = child.stop_reason().unwrap_or(TaskError::Canceled);
        let started_at = child.start_time().unwrap_or_else(tokio::time::Instant::now);
        let plan = lifecycle::plan_retry(&child, &reason, started_at);
        if let RetryPlan::Stop(last) = &plan {
            child.conclude(last.clone());
        }
        lifecycle::dispose_task(&child).await;
        if let RetryPlan::Wait(wait) = plan {
            if respawn(&child, &reason, wait).await {
                signals.push(signal_stream(&child));
                return false;
            }
        }
    }
    children.retain(|c| !c.ptr_eq(&child));
    true
}

/// Starts a fresh lifecycle for a disposed child once its retry window has passed.
async fn respawn(child: &TaskHandle, reason: &TaskError, wait: Duration) -> bool {
    match lifecycle::wait_retry(child, reason, wait).await {
        RetryDecision::Retry => {
            child.reset_lifecycle();
            lifecycle::start_task(child).await
        }
        RetryDecision::Stop(_) => false,
    }
}

fn stopped(child: &TaskHandle) {
    let reason = child.stop_reason().unwrap_or(TaskError::Canceled);
    child.publish(child.event(EventKind::TaskStopped).with_reason(reason.to_string()));
}
