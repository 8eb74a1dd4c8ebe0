//! # Playback-aware reader.
//!
//! [`AVRingReader`] wraps a [`RingReader`] with a small state machine that picks a start
//! position per [`SubMode`], catches up after a slow start and rebases timestamps so the
//! consumer sees a continuous clock starting near zero.
//!
//! ```text
//! INIT ──Real + keyframe──► FIRST ──newer keyframe──► NORMAL
//!   ├──NoJump / Buffer / Real without keyframe──────► NORMAL
//!   └──WaitKey, start frame not a keyframe──► WAITKEY ──keyframe──► NORMAL
//! ```
//!
//! In `FIRST` the reader is throttled to wall-clock time (at most one second of slack per
//! read). In `NORMAL`, unless buffering, a reader more than half a ring behind the writer
//! jumps to the latest keyframe ahead of it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Span, info, trace, warn};

use super::frame::{AVFrame, Payload};
use super::reader::RingReader;
use super::ring::Ring;
use crate::config::{SubMode, SubscribeConfig};
use crate::error::RingError;

/// Offset added when jumping from `FIRST` so the first frame after the jump is not
/// stamped with the same time as the last one before it.
const JUMP_GAP: Duration = Duration::from_millis(10);
/// Upper bound on a single throttling sleep in `FIRST`.
const MAX_THROTTLE: Duration = Duration::from_secs(1);

/// State of an [`AVRingReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// No frame read yet.
    Init,
    /// Reading from the start keyframe, throttled, until a newer keyframe appears.
    First,
    /// Sequential reading.
    Normal,
    /// Skipping frames until the next keyframe.
    WaitKey,
}

/// Subscriber-side reader with start-mode selection and timestamp rebasing.
pub struct AVRingReader<T: Payload> {
    reader: RingReader<T>,
    span: Span,
    state: ReadState,
    first_seq: u32,
    start_ts: Duration,
    first_ts: Duration,
    skip_ts: Duration,
    before_jump: Duration,
    start_time: Instant,
    abs_time: u32,
    delay: u32,
}

impl<T: Payload> AVRingReader<T> {
    /// Attaches a reader to `ring`, logging under `span`.
    pub fn new(ring: Arc<Ring<T>>, span: Span) -> Self {
        Self {
            reader: RingReader::new(ring),
            span,
            state: ReadState::Init,
            first_seq: 0,
            start_ts: Duration::ZERO,
            first_ts: Duration::ZERO,
            skip_ts: Duration::ZERO,
            before_jump: Duration::ZERO,
            start_time: Instant::now(),
            abs_time: 0,
            delay: 0,
        }
    }

    /// Sets the time the consumer's clock should start at; only the first read uses it.
    pub fn with_start_ts(mut self, start_ts: Duration) -> Self {
        self.start_ts = start_ts;
        self
    }

    /// Reads the next frame according to `conf`.
    pub async fn read_frame(&mut self, conf: &SubscribeConfig) -> Result<(), RingError> {
        match self.state {
            ReadState::Init => self.start(conf).await?,
            ReadState::First => self.read_first(conf).await?,
            ReadState::Normal => self.read_one(conf).await?,
            ReadState::WaitKey => loop {
                self.read_one(conf).await?;
                if self.reader.frame().is_some_and(|f| f.idr) {
                    info!(parent: &self.span, sequence = self.sequence(), "keyframe reached");
                    self.state = ReadState::Normal;
                    break;
                }
            },
        }
        self.rebase();
        Ok(())
    }

    /// Restarts the consumer clock at the current frame.
    pub fn reset_abs_time(&mut self) {
        if let Some(frame) = self.reader.frame() {
            self.skip_ts = frame.timestamp;
        }
        self.abs_time = 1;
    }

    /// Current frame.
    pub fn frame(&self) -> Option<&AVFrame<T>> {
        self.reader.frame()
    }

    /// Milliseconds since the consumer clock started; never `0` once a frame was read.
    pub fn abs_time(&self) -> u32 {
        self.abs_time
    }

    /// Sequences between the current frame and the writer's last published frame.
    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Current state.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// The underlying slot reader.
    pub fn reader(&self) -> &RingReader<T> {
        &self.reader
    }

    /// Releases the current slot; the next read starts over from `INIT`.
    pub fn stop_read(&mut self) {
        self.reader.stop_read();
        self.state = ReadState::Init;
    }

    async fn start(&mut self, conf: &SubscribeConfig) -> Result<(), RingError> {
        let ring = Arc::clone(self.reader.ring());
        let idr = ring.latest_idr();
        let mut start = idr.unwrap_or_else(|| ring.cursor());
        match conf.mode {
            SubMode::Real => {
                self.state = if idr.is_some() {
                    ReadState::First
                } else {
                    ReadState::Normal
                };
            }
            SubMode::NoJump => self.state = ReadState::Normal,
            SubMode::Buffer => {
                self.wait_buffer(&ring, conf.buffer_time).await?;
                if let Some(history) = ring.history_idr(conf.buffer_time) {
                    start = history;
                }
                self.state = ReadState::Normal;
            }
            SubMode::WaitKey => {
                start = ring.cursor();
                self.state = ReadState::WaitKey;
            }
        }

        self.reader.start_read(&start).await?;
        self.start_time = Instant::now();
        let (sequence, timestamp, idr) = match self.reader.frame() {
            Some(f) => (f.sequence, f.timestamp, f.idr),
            None => return Err(RingError::Discard),
        };
        if self.state == ReadState::WaitKey && idr {
            self.state = ReadState::Normal;
        }
        if self.first_ts.is_zero() {
            self.first_ts = timestamp;
        }
        self.skip_ts = self.first_ts.saturating_sub(self.start_ts);
        self.first_seq = sequence;
        info!(
            parent: &self.span,
            first_seq = sequence,
            first_ts = ?self.first_ts,
            start_ts = ?self.start_ts,
            mode = ?conf.mode,
            state = ?self.state,
            "start read"
        );
        Ok(())
    }

    async fn wait_buffer(&self, ring: &Ring<T>, want: Duration) -> Result<(), RingError> {
        loop {
            if ring.is_closed() {
                return Err(RingError::Closed);
            }
            let have = ring.buffer_time();
            if have >= want {
                return Ok(());
            }
            tokio::time::sleep(want - have).await;
        }
    }

    async fn read_first(&mut self, conf: &SubscribeConfig) -> Result<(), RingError> {
        let newer = self
            .reader
            .ring()
            .latest_idr()
            .filter(|idr| idr.sequence() != self.first_seq);
        if let Some(idr) = newer {
            self.reader.read(&idr).await?;
            self.skip_ts = self
                .timestamp()
                .saturating_sub(self.before_jump)
                .saturating_sub(self.start_ts)
                .saturating_sub(JUMP_GAP);
            self.state = ReadState::Normal;
            info!(
                parent: &self.span,
                sequence = self.sequence(),
                before_jump = ?self.before_jump,
                "jump to latest idr"
            );
            return Ok(());
        }

        self.read_one(conf).await?;
        self.before_jump = self.timestamp().saturating_sub(self.first_ts);
        let ahead = self.before_jump.saturating_sub(self.start_time.elapsed());
        if !ahead.is_zero() && ahead < MAX_THROTTLE {
            tokio::time::sleep(ahead).await;
        }
        Ok(())
    }

    async fn read_one(&mut self, conf: &SubscribeConfig) -> Result<(), RingError> {
        self.reader.read_next().await?;
        if conf.mode == SubMode::Buffer || self.state != ReadState::Normal {
            return Ok(());
        }
        let ring = Arc::clone(self.reader.ring());
        let sequence = self.sequence();
        let lag = ring.last_sequence().saturating_sub(sequence);
        if lag as usize <= ring.size() / 2 {
            return Ok(());
        }
        if let Some(idr) = ring.latest_idr().filter(|idr| idr.sequence() > sequence) {
            warn!(
                parent: &self.span,
                lag,
                sequence,
                idr = idr.sequence(),
                "reader too slow, jump to latest idr"
            );
            self.reader.read(&idr).await?;
        }
        Ok(())
    }

    fn rebase(&mut self) {
        let (sequence, timestamp) = (self.sequence(), self.timestamp());
        if timestamp < self.skip_ts {
            warn!(
                parent: &self.span,
                ts = ?timestamp,
                skip_ts = ?self.skip_ts,
                "timestamp behind skip offset"
            );
            self.abs_time = self.abs_time.saturating_add(1);
        } else {
            let ms = (timestamp - self.skip_ts).as_millis();
            self.abs_time = u32::try_from(ms).unwrap_or(u32::MAX).max(1);
        }
        self.delay = self.reader.ring().last_sequence().saturating_sub(sequence);
        trace!(
            parent: &self.span,
            sequence,
            abs_time = self.abs_time,
            delay = self.delay,
            "read frame"
        );
    }

    fn sequence(&self) -> u32 {
        self.reader.frame().map_or(0, |f| f.sequence)
    }

    fn timestamp(&self) -> Duration {
        self.reader.frame().map_or(Duration::ZERO, |f| f.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PublishConfig, SizeRange};
    use crate::stream::writer::RingWriter;

    fn writer(min: usize, max: usize) -> RingWriter<Vec<u8>> {
        RingWriter::new(&PublishConfig {
            ring_size: SizeRange::new(min, max),
            buffer_time: Duration::ZERO,
        })
    }

    /// Writes one frame stamped `(sequence - 1) * 40ms`.
    fn write(w: &mut RingWriter<Vec<u8>>, idr: bool) {
        let frame = w.value_mut();
        frame.timestamp = Duration::from_millis(u64::from(frame.sequence - 1) * 40);
        frame.idr = idr;
        frame.payload.push(1);
        w.step();
    }

    fn reader(w: &RingWriter<Vec<u8>>) -> AVRingReader<Vec<u8>> {
        AVRingReader::new(w.ring(), Span::none())
    }

    #[tokio::test]
    async fn slow_reader_jumps_to_keyframe_ahead() {
        let mut w = writer(20, 20);
        write(&mut w, true);
        for _ in 0..4 {
            write(&mut w, false);
        }
        let conf = SubscribeConfig::with_mode(SubMode::NoJump);
        let mut r = reader(&w);
        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.state(), ReadState::Normal);
        assert_eq!(r.frame().map(|f| f.sequence), Some(1));
        assert_eq!(r.abs_time(), 1);

        for seq in 6..=18 {
            write(&mut w, seq == 16);
        }
        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.frame().map(|f| f.sequence), Some(16));
        assert_eq!(r.abs_time(), 600);
        assert_eq!(r.delay(), 2);
    }

    #[tokio::test]
    async fn buffered_reader_never_jumps() {
        let mut w = writer(20, 20);
        write(&mut w, true);
        let conf = SubscribeConfig::with_mode(SubMode::Buffer);
        let mut r = reader(&w);
        r.read_frame(&conf).await.unwrap();
        for seq in 2..=18 {
            write(&mut w, seq == 16);
        }
        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.frame().map(|f| f.sequence), Some(2));
        assert_eq!(r.delay(), 16);
    }

    #[tokio::test]
    async fn real_mode_jumps_once_a_newer_keyframe_exists() {
        let mut w = writer(20, 20);
        write(&mut w, true);
        write(&mut w, false);
        write(&mut w, false);
        let conf = SubscribeConfig::default();
        let mut r = reader(&w);
        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.state(), ReadState::First);
        assert_eq!(r.frame().map(|f| f.sequence), Some(1));

        write(&mut w, true);
        write(&mut w, false);
        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.state(), ReadState::Normal);
        assert_eq!(r.frame().map(|f| f.sequence), Some(4));
        // 120ms - 0 before jump - 10ms gap
        assert_eq!(r.abs_time(), 10);

        r.read_frame(&conf).await.unwrap();
        assert_eq!(r.frame().map(|f| f.sequence), Some(5));
        assert_eq!(r.abs_time(), 50);
    }

    #[tokio::test]
    async fn buffer_mode_starts_behind_live_edge() {
        let mut w = writer(20, 20);
        write(&mut w, true);
        write(&mut w, false);
        write(&mut w, true);
        write(&mut w, false);
        let conf = SubscribeConfig {
            mode: SubMode::Buffer,
            buffer_time: Duration::from_millis(80),
        };
        let mut r = reader(&w);
        tokio::time::timeout(Duration::from_secs(1), r.read_frame(&conf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.frame().map(|f| f.sequence), Some(1));
        assert_eq!(r.state(), ReadState::Normal);
    }

    #[tokio::test]
    async fn wait_key_skips_to_next_keyframe() {
        let mut w = writer(8, 8);
        write(&mut w, true);
        write(&mut w, false);
        write(&mut w, false);
        let mut r = reader(&w);
        let task = tokio::spawn(async move {
            let conf = SubscribeConfig::with_mode(SubMode::WaitKey);
            r.read_frame(&conf).await?;
            let first = (r.state(), r.frame().map(|f| f.sequence));
            r.read_frame(&conf).await?;
            Ok::<_, RingError>((first, r.state(), r.frame().map(|f| f.sequence)))
        });
        tokio::task::yield_now().await;
        write(&mut w, false);
        write(&mut w, false);
        write(&mut w, true);
        write(&mut w, false);

        let (first, state, seq) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first, (ReadState::WaitKey, Some(4)));
        assert_eq!((state, seq), (ReadState::Normal, Some(6)));
    }

    #[tokio::test]
    async fn abs_time_never_reports_zero() {
        let mut w = writer(8, 8);
        write(&mut w, false);
        let mut r = reader(&w).with_start_ts(Duration::ZERO);
        let conf = SubscribeConfig::with_mode(SubMode::NoJump);
        // no keyframe yet: start at the cursor and wait for it
        let task = tokio::spawn(async move {
            r.read_frame(&conf).await.map(|()| r.abs_time())
        });
        tokio::task::yield_now().await;
        write(&mut w, false);
        let abs = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(abs, 1);
    }
}
