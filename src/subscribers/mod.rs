//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and the
//! built-in subscribers.
//!
//! ## Architecture
//! ```text
//! lifecycle ── publish(Event) ──► Bus ──► fan-out listener ──► SubscriberSet
//!                                                                  │
//!                                          ┌──────────────┬────────┴──────┬─────────┐
//!                                          ▼              ▼               ▼         ▼
//!                                     AliveTracker    LogWriter        Custom      ...
//! ```
//!
//! ## Built-ins
//! - [`AliveTracker`] live task ids; always installed on the root.
//! - [`LogWriter`] forwards events to `tracing` (`logging` feature).

mod alive;
#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

pub use alive::AliveTracker;
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
