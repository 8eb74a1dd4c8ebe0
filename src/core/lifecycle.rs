//! # Start and dispose of a single task.
//!
//! [`start_task`] drives one lifecycle through its start attempts:
//!
//! ```text
//! loop:
//!   state=Starting, publish TaskStarting
//!   start routine (bounded by start timeout, panics caught)
//!     ├─ Ok  → state=Started, fulfill started, on_start listeners,
//!     │        spawn run hook (unless already stopped) → return true
//!     └─ Err → publish TaskFailed
//!              check_retry (plan_retry + wait_retry):
//!                ├─ Retry   → wait out the window, fresh scope, loop
//!                └─ Stop(e) → stop, fulfill started/stopped with e → return false
//! ```
//!
//! [`dispose_task`] runs once per successful start, after the task's scope fired:
//! descendant listeners → before-dispose listeners → behaviour dispose → fulfill
//! `stopped` → dispose listeners.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::Instrument;

use crate::core::event_loop;
use crate::core::handle::{Behavior, TaskHandle, TaskKind, TaskState};
use crate::error::TaskError;
use crate::events::EventKind;
use crate::tasks::TaskContext;

/// Outcome of a retry check.
pub(crate) enum RetryDecision {
    /// Start again.
    Retry,
    /// Give up; the task stops with this reason.
    Stop(TaskError),
}

/// Runs start attempts until one succeeds or the retry policy gives up.
///
/// Returns `true` if the task started and should be registered with its supervisor.
pub(crate) async fn start_task(task: &TaskHandle) -> bool {
    loop {
        let Some(ctx) = task.context() else {
            return false;
        };
        let started_at = task.mark_start_time();
        task.set_state(TaskState::Starting);
        let quiet = task.kind() == TaskKind::Call;
        if !quiet {
            task.publish(task.event(EventKind::TaskStarting).with_retry(task.retry_count()));
            tracing::debug!(
                parent: ctx.span(),
                retry = task.retry_count(),
                task_type = task.kind().as_label(),
                "task start"
            );
        }

        match attempt(task, &ctx).await {
            Ok(()) => {
                task.set_state(TaskState::Started);
                task.started_promise().fulfill(Ok(()));
                if !quiet {
                    task.publish(task.event(EventKind::TaskStarted));
                    tracing::debug!(parent: ctx.span(), elapsed = ?started_at.elapsed(), "task started");
                }
                task.fire_start();
                if !ctx.is_stopped() {
                    task.reset_retry();
                    spawn_run(task, ctx);
                }
                return true;
            }
            Err(err) => {
                if !quiet {
                    task.publish(
                        task.event(EventKind::TaskFailed)
                            .with_retry(task.retry_count())
                            .with_reason(err.to_string()),
                    );
                }
                match check_retry(task, &err, started_at).await {
                    RetryDecision::Retry => {
                        if let Some(old) = task.renew_token() {
                            old.stop(err);
                        }
                    }
                    RetryDecision::Stop(reason) => {
                        fail(task, reason, quiet);
                        return false;
                    }
                }
            }
        }
    }
}

/// One start attempt with the timeout applied and panics turned into errors.
async fn attempt(task: &TaskHandle, ctx: &TaskContext) -> Result<(), TaskError> {
    let fut = AssertUnwindSafe(start_behavior(task, ctx)).catch_unwind();
    let outcome = match task.start_timeout() {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                task.publish(task.event(EventKind::StartTimeout).with_timeout(limit));
                return Err(TaskError::Timeout { timeout: limit });
            }
        },
        None => fut.await,
    };
    outcome.unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
}

async fn start_behavior(task: &TaskHandle, ctx: &TaskContext) -> Result<(), TaskError> {
    match &task.core.behavior {
        Behavior::Simple(inner) => inner.start(ctx).await,
        Behavior::Callback { start, dispose } => {
            (*start.lock())()?;
            match dispose {
                Some(_) => Ok(()),
                None => Err(TaskError::CallbackComplete),
            }
        }
        Behavior::Channel { source, pending } => {
            let stream = (*source.lock())(ctx)?;
            *pending.lock() = Some(stream);
            Ok(())
        }
        Behavior::Supervisor(core) => {
            if let Some(rx) = core.take_receiver() {
                event_loop::spawn(task.clone(), Arc::clone(core), rx);
            }
            Ok(())
        }
    }
}

/// Final start failure: the task never reaches `Started` in this lifecycle.
fn fail(task: &TaskHandle, reason: TaskError, quiet: bool) {
    task.stop(reason.clone());
    let recorded = task.stop_reason().unwrap_or_else(|| reason.clone());
    task.started_promise().fulfill(Err(reason));
    task.stopped_promise().fulfill(recorded.clone());
    task.set_state(TaskState::Disposed);
    if !quiet {
        task.publish(
            task.event(EventKind::TaskStopped)
                .with_reason(recorded.to_string()),
        );
    }
    notify_child_dispose(task);
}

/// Decides whether a failed (or stopped) task gets another lifecycle.
///
/// Waits out the remainder of the retry window before returning [`RetryDecision::Retry`];
/// the wait is cut short if the task's parent scope stops.
pub(crate) async fn check_retry(
    task: &TaskHandle,
    err: &TaskError,
    started_at: Instant,
) -> RetryDecision {
    match plan_retry(task, err, started_at) {
        RetryPlan::Stop(reason) => RetryDecision::Stop(reason),
        RetryPlan::Wait(wait) => wait_retry(task, err, wait).await,
    }
}

/// Outcome of the synchronous half of a retry check.
pub(crate) enum RetryPlan {
    /// Another lifecycle starts after this much more time.
    Wait(Duration),
    /// No further lifecycle; the task ends with this reason.
    Stop(TaskError),
}

/// Applies the retry policy: bumps the retry count and publishes the retry events.
///
/// The window is measured from `started_at`, the start of the failed attempt.
pub(crate) fn plan_retry(task: &TaskHandle, err: &TaskError, started_at: Instant) -> RetryPlan {
    let Some(scope) = task.parent_scope() else {
        return RetryPlan::Stop(err.clone());
    };
    if !err.is_retryable() || scope.is_stopped() || task.kind() == TaskKind::Supervisor {
        return RetryPlan::Stop(err.clone());
    }

    let policy = task.retry_policy();
    let count = task.retry_count();
    if !policy.limit.allows(count) {
        let last = policy.exhausted(err.clone());
        if matches!(last, TaskError::RetryExhausted { .. }) {
            tracing::warn!(
                parent: &task.span(),
                max = policy.limit.as_signed(),
                error = %err,
                "max retry failed"
            );
            task.publish(
                task.event(EventKind::RetryExhausted)
                    .with_retry(count)
                    .with_reason(err.to_string()),
            );
        }
        return RetryPlan::Stop(last);
    }

    let retry = task.bump_retry();
    let wait = policy.window(retry).saturating_sub(started_at.elapsed());
    tracing::warn!(
        parent: &task.span(),
        retry,
        max = policy.limit.as_signed(),
        error = %err,
        "retry"
    );
    task.publish(
        task.event(EventKind::RetryScheduled)
            .with_retry(retry)
            .with_delay(wait)
            .with_reason(err.to_string()),
    );
    RetryPlan::Wait(wait)
}

/// Sleeps out a planned retry window unless the parent scope stops first.
pub(crate) async fn wait_retry(task: &TaskHandle, err: &TaskError, wait: Duration) -> RetryDecision {
    let Some(scope) = task.parent_scope().cloned() else {
        return RetryDecision::Stop(err.clone());
    };
    if !wait.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = scope.stopped() => return RetryDecision::Stop(err.clone()),
        }
    }
    RetryDecision::Retry
}

/// Spawns the run hook of a started task; its outcome stops the task.
fn spawn_run(task: &TaskHandle, ctx: TaskContext) {
    let Behavior::Simple(inner) = &task.core.behavior else {
        return;
    };
    let Some(fut) = Arc::clone(inner).run(ctx.clone()) else {
        return;
    };
    task.set_state(TaskState::Running);
    let span = ctx.span().clone();
    tokio::spawn(
        async move {
            let reason = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => TaskError::Complete,
                Ok(Err(e)) => e,
                Err(payload) => TaskError::from_panic(payload),
            };
            ctx.stop(reason);
        }
        .instrument(span),
    );
}

/// Disposes a started task. No-op unless the task is `Started` or `Running`.
pub(crate) async fn dispose_task(task: &TaskHandle) {
    if !task.transition(
        |s| matches!(s, TaskState::Started | TaskState::Running),
        TaskState::Disposing,
    ) {
        return;
    }
    let reason = task.stop_reason().unwrap_or(TaskError::Canceled);

    notify_child_dispose(task);
    task.fire_before_dispose();
    match &task.core.behavior {
        Behavior::Simple(inner) => {
            if let Err(payload) = AssertUnwindSafe(inner.dispose(&reason)).catch_unwind().await {
                let err = TaskError::from_panic(payload);
                tracing::warn!(parent: &task.span(), error = %err, "dispose panicked");
            }
        }
        Behavior::Callback {
            dispose: Some(dispose),
            ..
        } => {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (*dispose.lock())()));
            if let Err(payload) = outcome {
                let err = TaskError::from_panic(payload);
                tracing::warn!(parent: &task.span(), error = %err, "dispose panicked");
            }
        }
        Behavior::Callback { dispose: None, .. } | Behavior::Channel { .. } => {}
        Behavior::Supervisor(core) => core.loop_done().await,
    }

    task.stopped_promise().fulfill(reason.clone());
    task.fire_dispose();
    task.set_state(TaskState::Disposed);
    if task.kind() != TaskKind::Call {
        task.publish(task.event(EventKind::TaskDisposed).with_reason(reason.to_string()));
        tracing::debug!(
            parent: &task.span(),
            reason = reason.as_label(),
            elapsed = ?task.start_time().map(|t| t.elapsed()),
            "task disposed"
        );
    }
}

/// Fires the `on_child_dispose` listeners of every supervising ancestor.
pub(crate) fn notify_child_dispose(task: &TaskHandle) {
    let mut cur = task.parent();
    while let Some(ancestor) = cur {
        if let Some(core) = ancestor.supervisor_core() {
            core.fire_child_dispose(task);
        }
        cur = ancestor.parent();
    }
}

/// Refuses admission: the task's `started` promise resolves with `reason`.
pub(crate) fn reject(task: &TaskHandle, reason: TaskError) {
    task.started_promise().fulfill(Err(reason.clone()));
    task.publish(task.event(EventKind::TaskRejected).with_reason(reason.to_string()));
    tracing::debug!(parent: &task.span(), reason = reason.as_label(), "task rejected");
}
