//! # Task abstractions and specifications.
//!
//! - [`Task`] trait for behaviours driven through start, run and dispose
//! - [`TaskContext`] what a task sees of itself during one lifecycle
//! - [`TaskFn`] closure-backed task
//! - [`TaskSpec`] behaviour plus admission options

mod spec;
mod task;
mod task_fn;

pub use spec::TaskSpec;
pub use task::{BoxTaskFuture, Task, TaskContext};
pub use task_fn::TaskFn;
