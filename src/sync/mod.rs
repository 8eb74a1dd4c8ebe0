//! One-shot synchronization primitives shared by tasks and tracks.
//!
//! ## Contents
//! - [`Promise`] single-assignment result cell (`started`, `stopped`, track `ready`)
//! - [`StopToken`] cancellation scope that remembers *why* it was cancelled

mod promise;
mod stop;

pub use promise::Promise;
pub use stop::StopToken;
