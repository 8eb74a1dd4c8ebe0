//! # Event subscriber trait.
//!
//! [`Subscribe`] lets an application watch the lifecycle of its streams: publishers
//! retrying an upstream, players rejected on shutdown, supervisors auto-stopping.
//!
//! ```text
//! fan-out listener ──► per-subscriber queue ──► worker ──► on_event(&Event)
//!                          │ full                   │ panic
//!                          ▼                        ▼
//!                 SubscriberOverflow        SubscriberPanicked
//! ```
//!
//! A subscriber sees events in publish order. It never slows down the tree or another
//! subscriber; when its queue is full the event is dropped for it alone.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use streamvisor::{Event, EventKind, Subscribe};
//!
//! struct RetryCounter(std::sync::atomic::AtomicU64);
//!
//! #[async_trait]
//! impl Subscribe for RetryCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::RetryScheduled {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "retry-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receiver of lifecycle events.
///
/// `on_event` runs on the subscriber's own worker; blocking there only delays this
/// subscriber. A panic loses the event being handled and nothing else.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Label carried by the overflow/panic events about this subscriber.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue length before events are dropped (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
