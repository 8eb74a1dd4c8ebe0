//! Retry policies.
//!
//! This module groups the knobs that control **whether** a failed start is attempted again
//! and **how long** the runtime waits in between.
//!
//! ## Contents
//! - [`RetryPolicy`] / [`RetryLimit`] retry ceiling (disabled / limited / unlimited)
//! - [`BackoffPolicy`] how the retry window evolves (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! TaskSpec { retry: RetryPolicy { limit, backoff }, .. }
//!      └─► core::lifecycle::start_task uses:
//!           - limit.allows(retry_count) to decide retry/stop
//!           - backoff.next(n) minus elapsed time as the wait
//!           - exhausted(err) to build the final stop reason
//! ```
//!
//! ## Defaults
//! - `RetryLimit::Disabled`: a failing start stops the task with the raw error.
//! - `BackoffPolicy::default()`: constant 1s window, capped at 30s, no jitter.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::{RetryLimit, RetryPolicy};
