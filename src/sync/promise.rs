//! # Single-assignment result cell.
//!
//! [`Promise`] is fulfilled exactly once and awaited by any number of readers. It backs the
//! `started`/`stopped` signals of every task and the `ready` signal of every track.
//!
//! The cell holds `Option<T>` inside a [`tokio::sync::watch`] channel: `None` means pending,
//! so "fulfilled with `Ok(())`" is never confused with "not fulfilled yet".
//!
//! ## Rules
//! - The first [`Promise::fulfill`] wins; later calls return `false` and change nothing.
//! - [`Promise::wait`] suspends only the caller and returns a clone of the value.
//! - No timeout is built in; compose one with `tokio::time::timeout`.

use tokio::sync::watch;

/// One-shot, multi-reader result cell.
#[derive(Debug)]
pub struct Promise<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Promise<T> {
    /// Creates a pending promise.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Creates an already fulfilled promise.
    pub fn resolved(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Self { tx }
    }

    /// Sets the value if still pending. Returns `true` if this call fulfilled it.
    pub fn fulfill(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    /// Returns `true` while nobody fulfilled the promise.
    pub fn is_pending(&self) -> bool {
        self.tx.borrow().is_none()
    }

    /// Returns the value without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Waits until the promise is fulfilled and returns its value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                if let Some(value) = rx.borrow().clone() {
                    return value;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
