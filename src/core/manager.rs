//! # Keyed registry of live tasks.
//!
//! [`Manager`] runs tasks under its own keep-alive child supervisor and indexes the ones that
//! started by key. A second task started under a key that is still taken is stopped with
//! [`TaskError::Exist`]; a disposed task leaves the index.
//!
//! ## Example
//! ```rust
//! use streamvisor::{Manager, RuntimeConfig, Supervisor, TaskContext, TaskError, TaskFn, TaskSpec};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let root = Supervisor::builder(RuntimeConfig::default()).build_root();
//!     let streams: Manager<String> = Manager::new(&root);
//!
//!     let idle = || TaskSpec::from_arc(TaskFn::arc("Stream", |ctx: TaskContext| async move {
//!         ctx.stopped().await;
//!         Ok::<_, TaskError>(())
//!     }));
//!     let first = streams.spawn("live/a".to_string(), idle());
//!     first.wait_started().await.unwrap();
//!
//!     let dup = streams.spawn("live/a".to_string(), idle());
//!     assert_eq!(dup.wait_stopped().await, TaskError::Exist);
//!     assert_eq!(streams.len(), 1);
//! }
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::builder::SupervisorBuilder;
use crate::core::handle::TaskHandle;
use crate::core::supervisor::Supervisor;
use crate::error::TaskError;
use crate::tasks::TaskSpec;

/// Keyed, duplicate-free set of running tasks.
pub struct Manager<K> {
    sup: Supervisor,
    entries: Arc<Mutex<HashMap<K, TaskHandle>>>,
}

impl<K> Manager<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a manager whose tasks run under a new child of `parent`.
    pub fn new(parent: &Supervisor) -> Self {
        let sup = SupervisorBuilder::default()
            .with_keep_alive(true)
            .with_owner_type("Manager")
            .build_under(parent);
        Self {
            sup,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admits `task` and indexes it under `key` once it has started.
    pub fn add(&self, key: K, task: TaskHandle) -> TaskHandle {
        let entries = Arc::clone(&self.entries);
        let k = key.clone();
        task.on_start(move |started| {
            let mut map = entries.lock();
            match map.get(&k) {
                Some(existing) if !existing.ptr_eq(started) => {
                    drop(map);
                    started.stop(TaskError::Exist);
                }
                _ => {
                    map.insert(k.clone(), started.clone());
                }
            }
        });

        let entries = Arc::clone(&self.entries);
        task.on_dispose(move |disposed| {
            let mut map = entries.lock();
            if map.get(&key).is_some_and(|h| h.ptr_eq(disposed)) {
                map.remove(&key);
            }
        });
        self.sup.add(task)
    }

    /// Admits a task built from `spec` under `key`.
    pub fn spawn(&self, key: K, spec: TaskSpec) -> TaskHandle {
        self.add(key, spec.into_handle())
    }

    /// The live task registered under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<TaskHandle>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).cloned()
    }

    /// Keys of all live tasks.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no task is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The supervisor the tasks run under.
    pub fn supervisor(&self) -> &Supervisor {
        &self.sup
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::tasks::{TaskContext, TaskFn};

    const WAIT: Duration = Duration::from_secs(2);

    fn idle() -> TaskSpec {
        TaskSpec::from_arc(TaskFn::arc("Stream", |ctx: TaskContext| async move {
            ctx.stopped().await;
            Ok::<_, TaskError>(())
        }))
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_and_freed_on_dispose() {
        let root = Supervisor::builder(RuntimeConfig::default()).build_root();
        let streams: Manager<&'static str> = Manager::new(&root);

        let first = streams.spawn("live/a", idle());
        timeout(WAIT, first.wait_started()).await.unwrap().unwrap();
        let dup = streams.spawn("live/a", idle());
        assert_eq!(timeout(WAIT, dup.wait_stopped()).await.unwrap(), TaskError::Exist);
        assert!(streams.get("live/a").is_some_and(|h| h.ptr_eq(&first)));

        first.stop(TaskError::Exit);
        timeout(WAIT, first.wait_stopped()).await.unwrap();
        timeout(WAIT, async {
            while !streams.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let again = streams.spawn("live/a", idle());
        timeout(WAIT, again.wait_started()).await.unwrap().unwrap();
        assert_eq!(streams.keys(), vec!["live/a"]);
        root.shutdown();
    }
}
