//! # streamvisor
//!
//! **Streamvisor** is the concurrency core of a real-time media relay: a tree of supervised
//! tasks plus a keyframe-aware ring buffer that fans one publisher's frames out to many
//! subscribers without letting a slow subscriber stall the publisher.
//!
//! ## Architecture
//! ### Supervision tree
//! ```text
//!                       ┌─────────────────────────────────────────┐
//!                       │ root Supervisor (keep-alive)            │
//!                       │  - Bus (broadcast events)               │
//!                       │  - fan-out listener ─► SubscriberSet    │
//!                       │  - AliveTracker (live task ids)         │
//!                       └──────┬──────────────────┬───────────────┘
//!              admission queue │                  │ child signals (stopped / ticks)
//!                              ▼                  ▼
//!                 ┌──────────────────────┐   ┌──────────────────────┐
//!                 │ event loop (1 task)  │   │ child Supervisor     │
//!                 │ start_task inline    │   │ own loop, own queue  │
//!                 │ dispose owned tasks  │   │ auto-stop when empty │
//!                 └──────────────────────┘   └──────────────────────┘
//! ```
//!
//! ### Task lifecycle
//! ```text
//! add(task) ──► queue ──► start (timeout, catch_unwind)
//!                           ├─ Ok  ──► on_start hooks ──► run hook spawned (optional)
//!                           └─ Err ──► retry window (RetryPolicy) ──► start again
//!                                      └─ limit reached ──► RetryExhausted { last }
//! stop(reason) ──► scope cancelled (cascades to descendants with the same reason)
//!              ──► owner disposes: before-dispose hooks ──► dispose ──► on_dispose hooks
//! ```
//!
//! ### Ring buffer
//! ```text
//!            RingWriter (single producer)
//!                 │ step(): publish, claim next slot (discard it if a reader holds it)
//!                 ▼
//!   ┌────┬────┬────┬────┬────┬────┐   keyframe index, buffer time, size 20..=1024
//!   │ s1 │ s2 │ s3 │ s4 │ s5 │ .. │◄─ grows/shrinks by 5 around the keyframes
//!   └────┴────┴────┴────┴────┴────┘
//!      ▲              ▲
//!  RingReader     AVRingReader (Real / NoJump / Buffer / WaitKey)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types                                  |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Supervision**   | Task tree, admission, auto-stop, graceful shutdown.          | [`Supervisor`], [`SupervisorBuilder`]      |
//! | **Tasks**         | Start/run/dispose behaviours, callbacks, channels, timers.   | [`Task`], [`TaskFn`], [`TaskSpec`]         |
//! | **Handles**       | Stop with a reason, wait for start/stop, lifecycle hooks.    | [`TaskHandle`], [`StopToken`], [`Promise`] |
//! | **Registry**      | Duplicate-free keyed task set.                               | [`Manager`]                                |
//! | **Policies**      | Retry ceiling and backoff window.                            | [`RetryPolicy`], [`BackoffPolicy`]         |
//! | **Streams**       | Ring buffer, readers, tracks.                                | [`RingWriter`], [`AVRingReader`], [`AVTrack`] |
//! | **Events**        | Lifecycle events and subscribers.                            | [`Event`], [`Subscribe`], [`AliveTracker`] |
//! | **Errors**        | Stop reasons, ring conditions, runtime errors.               | [`TaskError`], [`RingError`], [`RuntimeError`] |
//! | **Configuration** | Runtime, publish and subscribe settings.                     | [`RuntimeConfig`], [`PublishConfig`], [`SubscribeConfig`] |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber, which forwards events to `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use streamvisor::{
//!     AVTrack, PublishConfig, RuntimeConfig, SubMode, SubscribeConfig, Supervisor, TaskContext,
//!     TaskError, TaskFn, TaskSpec,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let root = Supervisor::builder(RuntimeConfig::default()).build_root();
//!
//!     let mut track: AVTrack<Vec<u8>> = AVTrack::new("video", &PublishConfig::default());
//!     let view = track.view();
//!
//!     let player = root.spawn(TaskSpec::from_arc(TaskFn::arc("Player", move |ctx: TaskContext| {
//!         let mut reader = view.subscribe("player");
//!         async move {
//!             let conf = SubscribeConfig::with_mode(SubMode::NoJump);
//!             for _ in 0..3 {
//!                 tokio::select! {
//!                     _ = ctx.stopped() => return Ok(()),
//!                     res = reader.read_frame(&conf) => res.map_err(|e| TaskError::fail(e.to_string()))?,
//!                 }
//!             }
//!             Ok::<_, TaskError>(())
//!         }
//!     })));
//!     player.wait_started().await.unwrap();
//!
//!     for i in 0..4u8 {
//!         let frame = track.writer_mut().value_mut();
//!         frame.idr = i == 0;
//!         frame.timestamp = Duration::from_millis(u64::from(i) * 40);
//!         frame.payload.push(i);
//!         track.writer_mut().step();
//!         tokio::task::yield_now().await;
//!     }
//!
//!     assert_eq!(player.wait_stopped().await, TaskError::Complete);
//!     root.shutdown_with_grace().await.unwrap();
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod policies;
mod stream;
mod subscribers;
mod sync;
mod tasks;

// ---- Public re-exports ----

pub use config::{PublishConfig, RuntimeConfig, SizeRange, SubMode, SubscribeConfig};
pub use core::{Manager, Supervisor, SupervisorBuilder, TaskHandle, TaskKind, TaskState, WeakTaskHandle};
pub use error::{RingError, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryLimit, RetryPolicy};
pub use stream::{
    AVFrame, AVRingReader, AVTrack, Payload, ReadState, Ring, RingReader, RingWriter, SlotRef,
    TrackView,
};
pub use subscribers::{AliveTracker, Subscribe, SubscriberSet};
pub use sync::{Promise, StopToken};
pub use tasks::{BoxTaskFuture, Task, TaskContext, TaskFn, TaskSpec};

// Optional: expose the built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
