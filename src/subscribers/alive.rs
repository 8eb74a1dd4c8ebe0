//! # Tracker of live tasks with sequence-based ordering.
//!
//! [`AliveTracker`] keeps the set of tasks that started and have not been disposed yet.
//! The root supervisor always installs one; [`Supervisor::shutdown_with_grace`] uses its
//! snapshot to name the tasks that were still alive when the grace period ran out.
//!
//! ## Architecture
//! ```text
//! lifecycle ──► Bus ──► fan-out listener ──► SubscriberSet ──► AliveTracker::on_event()
//!                                                                     │
//!                                                                     ▼
//!                                                    HashMap<task_id, {owner, seq, alive}>
//! ```
//!
//! ## Rules
//! - `TaskStarted` marks a task alive; `TaskDisposed` marks it dead.
//! - Events with `seq <= last_seq` for the same task are stale and ignored.
//! - Reads are eventually consistent (events are delivered asynchronously).
//!
//! [`Supervisor::shutdown_with_grace`]: crate::Supervisor::shutdown_with_grace

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

#[derive(Debug, Clone)]
struct Entry {
    owner: Arc<str>,
    last_seq: u64,
    alive: bool,
}

/// Thread-safe tracker of live tasks, keyed by task id.
#[derive(Default)]
pub struct AliveTracker {
    state: RwLock<HashMap<u32, Entry>>,
}

impl AliveTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event if it is newer than the last one seen for its task.
    ///
    /// Returns `true` if the alive state changed.
    pub async fn update(&self, ev: &Event) -> bool {
        let (Some(id), Some(owner)) = (ev.task_id, ev.task.as_ref()) else {
            return false;
        };
        let alive = match ev.kind {
            EventKind::TaskStarted => true,
            EventKind::TaskDisposed => false,
            _ => return false,
        };

        let mut state = self.state.write().await;
        let entry = state.entry(id).or_insert_with(|| Entry {
            owner: Arc::clone(owner),
            last_seq: 0,
            alive: false,
        });
        if entry.last_seq != 0 && ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        let changed = entry.alive != alive;
        entry.alive = alive;
        if !alive {
            state.remove(&id);
        }
        changed
    }

    /// Sorted `Owner#id` labels of tasks currently alive.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut ids: Vec<_> = state
            .iter()
            .filter(|(_, e)| e.alive)
            .map(|(id, e)| (*id, Arc::clone(&e.owner)))
            .collect();
        ids.sort_unstable_by_key(|(id, _)| *id);
        ids.into_iter().map(|(id, o)| format!("{o}#{id}")).collect()
    }

    /// True if the task with `id` is alive.
    pub async fn is_alive(&self, id: u32) -> bool {
        self.state
            .read()
            .await
            .get(&id)
            .map(|e| e.alive)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Subscribe for AliveTracker {
    async fn on_event(&self, ev: &Event) {
        self.update(ev).await;
    }

    fn name(&self) -> &'static str {
        "alive-tracker"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn started_then_disposed() {
        let t = AliveTracker::new();
        assert!(t.update(&Event::new(EventKind::TaskStarted).with_task("Pub", 3)).await);
        assert!(t.update(&Event::new(EventKind::TaskStarted).with_task("Sub", 9)).await);
        assert_eq!(t.snapshot().await, vec!["Pub#3".to_string(), "Sub#9".to_string()]);

        assert!(t.update(&Event::new(EventKind::TaskDisposed).with_task("Pub", 3)).await);
        assert!(!t.is_alive(3).await);
        assert_eq!(t.snapshot().await, vec!["Sub#9".to_string()]);
    }

    #[tokio::test]
    async fn stale_event_is_ignored() {
        let t = AliveTracker::new();
        let early = Event::new(EventKind::TaskDisposed).with_task("Pub", 1);
        let late = Event::new(EventKind::TaskStarted).with_task("Pub", 1);

        assert!(t.update(&late).await);
        // `early` has a lower seq than `late` but arrives second.
        assert!(!t.update(&early).await);
        assert!(t.is_alive(1).await);
    }
}
