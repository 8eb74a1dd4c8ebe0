//! Runtime core: supervision tree and task lifecycle.
//!
//! The public API of this module is [`Supervisor`], [`SupervisorBuilder`], [`TaskHandle`]
//! and [`Manager`].
//!
//! Internal modules:
//! - [`handle`]: shared task identity, stop scope, promises, listeners;
//! - [`lifecycle`]: start attempts with retry, dispose;
//! - [`event_loop`]: per-supervisor loop multiplexing admissions and child signals;
//! - [`supervisor`]: admission API, graceful shutdown, OS signals;
//! - [`builder`]: root/child construction, subscriber wiring;
//! - [`manager`]: keyed registry on top of a supervisor;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod event_loop;
mod handle;
mod lifecycle;
mod manager;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use handle::{TaskHandle, TaskKind, TaskState, WeakTaskHandle};
pub use manager::Manager;
pub use supervisor::Supervisor;

pub(crate) use handle::{Behavior, CallbackDispose, HandleOptions, TickStream};
