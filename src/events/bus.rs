//! # Event bus shared by a supervision tree.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. The root supervisor creates
//! it; every child supervisor and task inherits a clone at admission.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                      Consumer (one per root):
//!   root loop      ──┐
//!   child loops    ──┼──► Bus ──► fan-out listener ──► SubscriberSet
//!   task lifecycle ──┘  (broadcast)   (spawned by build_root)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks and never fails; with no receivers the event is dropped.
//! - Capacity is shared by all receivers; a lagging receiver sees `RecvError::Lagged(n)`.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to every active receiver.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
