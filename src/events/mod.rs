//! Lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `core::lifecycle` (start/retry/dispose), `core::event_loop`
//!   (rejections, auto-stop), `Supervisor::shutdown_with_grace`, `SubscriberSet` workers.
//! - **Consumers**: the root's fan-out listener, which feeds `SubscriberSet`
//!   (including the built-in `AliveTracker`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
