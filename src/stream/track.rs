//! # Publisher-side track.
//!
//! [`AVTrack`] owns the [`RingWriter`] of one media track together with its readiness
//! signal and input statistics. Subscribers never touch the track itself: they hold a
//! cloneable [`TrackView`] and create readers from it.
//!
//! ## Example
//! ```rust
//! use streamvisor::{AVTrack, PublishConfig, SubMode, SubscribeConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut track: AVTrack<Vec<u8>> = AVTrack::new("video", &PublishConfig::default());
//!     let view = track.view();
//!
//!     let frame = track.writer_mut().value_mut();
//!     frame.idr = true;
//!     frame.payload.extend_from_slice(b"keyframe");
//!     track.add_bytes_in(8);
//!     track.writer_mut().step();
//!     track.ready(Ok(()));
//!
//!     view.wait_ready().await.unwrap();
//!     let mut reader = view.subscribe("player");
//!     reader.read_frame(&SubscribeConfig::with_mode(SubMode::NoJump)).await.unwrap();
//!     assert_eq!(reader.frame().map(|f| f.payload.as_slice()), Some(&b"keyframe"[..]));
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Span, debug, info, info_span};

use super::av_reader::AVRingReader;
use super::frame::Payload;
use super::ring::Ring;
use super::writer::RingWriter;
use crate::config::PublishConfig;
use crate::error::TaskError;
use crate::sync::Promise;

const STATS_WINDOW: Duration = Duration::from_secs(1);

struct TrackState {
    ready: Promise<Result<(), TaskError>>,
    bps: AtomicU64,
    fps: AtomicU64,
}

/// Publisher side of one media track.
pub struct AVTrack<T: Payload> {
    writer: RingWriter<T>,
    state: Arc<TrackState>,
    span: Span,
    bytes_in: usize,
    frame_count: u64,
    last_stats: Instant,
}

impl<T: Payload> AVTrack<T> {
    /// Creates a track named `name` with a ring sized per `cfg`.
    pub fn new(name: &str, cfg: &PublishConfig) -> Self {
        let span = info_span!("track", name);
        Self::with_span(span, cfg)
    }

    /// Creates a track logging under `span`.
    pub fn with_span(span: Span, cfg: &PublishConfig) -> Self {
        let writer = RingWriter::new(cfg).with_span(span.clone());
        info!(parent: &span, size = writer.size(), buffer_time = ?cfg.buffer_time, "create");
        Self {
            writer,
            state: Arc::new(TrackState {
                ready: Promise::new(),
                bps: AtomicU64::new(0),
                fps: AtomicU64::new(0),
            }),
            span,
            bytes_in: 0,
            frame_count: 0,
            last_stats: Instant::now(),
        }
    }

    /// The ring writer.
    pub fn writer(&self) -> &RingWriter<T> {
        &self.writer
    }

    /// The ring writer, for publishing frames.
    pub fn writer_mut(&mut self) -> &mut RingWriter<T> {
        &mut self.writer
    }

    /// Cloneable subscriber-side handle.
    pub fn view(&self) -> TrackView<T> {
        TrackView {
            ring: self.writer.ring(),
            state: Arc::clone(&self.state),
            span: self.span.clone(),
        }
    }

    /// Attaches a reader directly.
    pub fn subscribe(&self, name: &str) -> AVRingReader<T> {
        self.view().subscribe(name)
    }

    /// Marks the track ready (`Ok`) or failed. Returns `false` if it was already settled.
    pub fn ready(&self, result: Result<(), TaskError>) -> bool {
        let failed = result.as_ref().err().map(ToString::to_string);
        let first = self.state.ready.fulfill(result);
        if first {
            match failed {
                None => info!(parent: &self.span, "ready"),
                Some(error) => info!(parent: &self.span, error = %error, "ready failed"),
            }
        }
        first
    }

    /// True once the track was marked ready successfully.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Waits until the track is settled.
    pub async fn wait_ready(&self) -> Result<(), TaskError> {
        self.state.ready.wait().await
    }

    /// Accounts one incoming frame of `n` bytes; rates refresh about once per second.
    pub fn add_bytes_in(&mut self, n: usize) {
        self.bytes_in += n;
        self.frame_count += 1;
        let elapsed = self.last_stats.elapsed();
        if elapsed > STATS_WINDOW {
            let secs = elapsed.as_secs_f64();
            let bps = (self.bytes_in as f64 / secs) as u64;
            let fps = (self.frame_count as f64 / secs) as u64;
            self.state.bps.store(bps, Ordering::Relaxed);
            self.state.fps.store(fps, Ordering::Relaxed);
            self.bytes_in = 0;
            self.frame_count = 0;
            self.last_stats = Instant::now();
            debug!(parent: &self.span, bps, fps, "input rate");
        }
    }

    /// Bytes per second over the last window.
    pub fn bps(&self) -> u64 {
        self.state.bps.load(Ordering::Relaxed)
    }

    /// Frames per second over the last window.
    pub fn fps(&self) -> u64 {
        self.state.fps.load(Ordering::Relaxed)
    }

    /// Span the track logs under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl TrackState {
    fn is_ready(&self) -> bool {
        matches!(self.ready.try_get(), Some(Ok(())))
    }
}

/// Subscriber-side handle to an [`AVTrack`].
pub struct TrackView<T> {
    ring: Arc<Ring<T>>,
    state: Arc<TrackState>,
    span: Span,
}

impl<T> Clone for TrackView<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            state: Arc::clone(&self.state),
            span: self.span.clone(),
        }
    }
}

impl<T: Payload> TrackView<T> {
    /// Attaches a reader named `name`.
    pub fn subscribe(&self, name: &str) -> AVRingReader<T> {
        let span = info_span!(parent: &self.span, "reader", name);
        AVRingReader::new(Arc::clone(&self.ring), span)
    }

    /// The shared ring.
    pub fn ring(&self) -> &Arc<Ring<T>> {
        &self.ring
    }

    /// True once the track was marked ready successfully.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Waits until the track is settled.
    pub async fn wait_ready(&self) -> Result<(), TaskError> {
        self.state.ready.wait().await
    }

    /// Bytes per second over the last window.
    pub fn bps(&self) -> u64 {
        self.state.bps.load(Ordering::Relaxed)
    }

    /// Frames per second over the last window.
    pub fn fps(&self) -> u64 {
        self.state.fps.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_settles_once() {
        let track: AVTrack<()> = AVTrack::new("audio", &PublishConfig::default());
        let view = track.view();
        assert!(!view.is_ready());

        let waiter = tokio::spawn(async move { view.wait_ready().await });
        assert!(track.ready(Err(TaskError::fail("no codec"))));
        assert!(!track.ready(Ok(())));

        let res = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res, Err(TaskError::fail("no codec")));
        assert!(!track.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn rates_refresh_after_a_window() {
        let mut track: AVTrack<()> = AVTrack::new("video", &PublishConfig::default());
        track.add_bytes_in(1000);
        assert_eq!(track.bps(), 0);

        tokio::time::advance(Duration::from_millis(1500)).await;
        track.add_bytes_in(500);
        assert!(track.fps() >= 1);
        assert!(track.bps() > 0);
    }

    #[tokio::test]
    async fn view_counts_subscribers() {
        let track: AVTrack<()> = AVTrack::new("video", &PublishConfig::default());
        let view = track.view();
        let a = view.subscribe("a");
        let b = track.subscribe("b");
        assert_eq!(view.ring().readers(), 2);
        drop((a, b));
        assert_eq!(view.ring().readers(), 0);
    }
}
