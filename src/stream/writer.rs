//! # Single-producer side of a ring.
//!
//! [`RingWriter`] always holds the write half of exactly one slot, the *cursor*. The
//! producer fills [`RingWriter::value_mut`] and calls [`RingWriter::step`] to publish it:
//!
//! ```text
//! step():
//!   index keyframe ─► manage buffer (grow / pop oldest keyframe / shrink)
//!   claim next slot ─┬─ free             → reset, reuse              (returns true)
//!                    └─ held by a reader → discard, replace in place (returns false)
//!   assign sequence + 1 ─► release previous slot (wakes readers)
//! ```
//!
//! Dropping the writer closes the ring; readers waiting on the cursor get
//! [`RingError::Closed`](crate::RingError::Closed).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{Span, debug, trace};

use super::frame::{AVFrame, Payload};
use super::ring::{Links, Ring, Slot, SlotRef};
use crate::config::{PublishConfig, SizeRange};

/// Slots added or removed per automatic resize.
const RESIZE_STEP: usize = 5;
/// Consecutive surplus steps before the ring shrinks.
const SHRINK_AFTER: u32 = 50;

/// Writes frames into a ring shared with any number of [`RingReader`](crate::RingReader)s.
pub struct RingWriter<T: Payload> {
    ring: Arc<Ring<T>>,
    current: OwnedRwLockWriteGuard<AVFrame<T>>,
    bounds: SizeRange,
    buffer_min: Duration,
    reduce_vol: u32,
    span: Span,
}

impl<T: Payload> RingWriter<T> {
    /// Creates a writer sized and buffered per `cfg`.
    pub fn new(cfg: &PublishConfig) -> Self {
        let ring = Arc::new(Ring::new(cfg.ring_size.min));
        let current = {
            let mut links = ring.links.write();
            let cursor = links.cursor;
            links.stamp(cursor);
            claim(&links.slots[cursor])
        };
        let mut writer = Self {
            ring,
            current,
            bounds: cfg.ring_size,
            buffer_min: cfg.buffer_time,
            reduce_vol: 0,
            span: Span::none(),
        };
        writer.current.sequence = 1;
        writer
    }

    /// Creates a fixed-size writer with `n` slots and no buffering target.
    pub fn with_capacity(n: usize) -> Self {
        Self::new(&PublishConfig {
            ring_size: SizeRange::new(n, n),
            buffer_time: Duration::ZERO,
        })
    }

    /// Attaches a span that parents the writer's log records.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The frame being populated.
    pub fn value(&self) -> &AVFrame<T> {
        &self.current
    }

    /// The frame being populated, for writing.
    pub fn value_mut(&mut self) -> &mut AVFrame<T> {
        &mut self.current
    }

    /// Publishes the current frame and moves to the next slot.
    ///
    /// Returns `false` if the next slot was still held by a reader and had to be
    /// discarded and replaced.
    pub fn step(&mut self) -> bool {
        let (sequence, timestamp, idr) = {
            let frame = &mut *self.current;
            frame.write_time = Some(Instant::now());
            (frame.sequence, frame.timestamp, frame.idr)
        };

        let ring = Arc::clone(&self.ring);
        let mut links = ring.links.write();
        if idr {
            let index = links.cursor;
            let generation = links.slots[index].generation();
            links.idr.push_back(SlotRef {
                index,
                generation,
                sequence,
                timestamp,
            });
            trace!(parent: &self.span, sequence, "add idr");
        }
        self.manage_buffer(&mut links, timestamp);

        let next = links.next_of(links.cursor);
        links.forget_idr(next);
        let claimed = links.slots[next].try_claim();
        let (slot, normal) = match claimed {
            Some(frame) => (frame, true),
            None => {
                let fresh = links.replace(next);
                (claim(&fresh), false)
            }
        };
        links.stamp(next);
        links.last = Some(links.cursor);
        links.cursor = next;
        drop(links);

        let mut slot = slot;
        slot.reset();
        slot.sequence = sequence.wrapping_add(1);
        let previous = std::mem::replace(&mut self.current, slot);
        ring.publish(sequence, timestamp);
        drop(previous);

        if !normal {
            debug!(parent: &self.span, sequence, "discard slot held by reader");
        }
        normal
    }

    /// Grows (`delta > 0`) or shrinks (`delta < 0`) the ring after the cursor.
    pub fn resize(&mut self, delta: isize) {
        let mut links = self.ring.links.write();
        if delta > 0 {
            links.glow(delta.unsigned_abs());
        } else {
            let discarded = links.reduce(delta.unsigned_abs());
            if discarded > 0 {
                debug!(parent: &self.span, discarded, "discard slots held by readers");
            }
        }
        debug!(parent: &self.span, delta, size = links.size, "resize");
    }

    /// Slots linked into the ring.
    pub fn size(&self) -> usize {
        self.ring.links.read().size
    }

    /// Detached slots waiting for reuse.
    pub fn pool_size(&self) -> usize {
        self.ring.links.read().pool.len()
    }

    /// Shared read-side view.
    pub fn ring(&self) -> Arc<Ring<T>> {
        Arc::clone(&self.ring)
    }

    /// The slot being populated.
    pub fn cursor(&self) -> SlotRef {
        self.ring.cursor()
    }

    /// Closes the ring and releases the cursor slot.
    pub fn dispose(self) {}

    fn manage_buffer(&mut self, links: &mut Links<T>, timestamp: Duration) {
        let (oldest, latest) = match (links.idr.front(), links.idr.back()) {
            (Some(o), Some(l)) => (*o, *l),
            _ => return,
        };
        let buffered = timestamp.saturating_sub(oldest.timestamp);
        self.ring.set_buffer_time(buffered);

        let next = links.next_of(links.cursor);
        let room = self.bounds.max.saturating_sub(links.size).min(RESIZE_STEP);
        if next == latest.index {
            if room > 0 {
                links.glow(room);
                trace!(parent: &self.span, size = links.size, "grow to keep latest idr");
            }
        } else if next == oldest.index {
            let enough = links
                .idr
                .get(1)
                .is_some_and(|second| timestamp.saturating_sub(second.timestamp) > self.buffer_min);
            if enough {
                links.idr.pop_front();
                trace!(parent: &self.span, sequence = oldest.sequence, "remove old idr");
            } else if room > 0 {
                links.glow(room);
                trace!(parent: &self.span, size = links.size, "grow to keep buffer");
            }
        } else if buffered > self.buffer_min {
            let mut probe = next;
            let mut near = false;
            for _ in 0..RESIZE_STEP {
                if probe == oldest.index {
                    near = true;
                    break;
                }
                probe = links.next_of(probe);
            }
            if near || links.size <= self.bounds.min + RESIZE_STEP {
                self.reduce_vol = 0;
            } else {
                self.reduce_vol += 1;
                if self.reduce_vol > SHRINK_AFTER {
                    links.reduce(RESIZE_STEP);
                    self.reduce_vol = 0;
                    trace!(parent: &self.span, size = links.size, "shrink surplus buffer");
                }
            }
        }
    }
}

impl<T: Payload> Drop for RingWriter<T> {
    fn drop(&mut self) {
        if self.ring.close() {
            debug!(parent: &self.span, last = self.ring.last_sequence(), "dispose");
        }
    }
}

fn claim<T: Payload>(slot: &Slot<T>) -> OwnedRwLockWriteGuard<AVFrame<T>> {
    match slot.try_claim() {
        Some(frame) => frame,
        None => unreachable!("slot outside the ring is never shared"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RingError;
    use crate::stream::reader::RingReader;

    fn write(w: &mut RingWriter<Vec<u8>>, byte: u8, idr: bool, ms: u64) -> bool {
        let frame = w.value_mut();
        frame.payload.push(byte);
        frame.idr = idr;
        frame.timestamp = Duration::from_millis(ms);
        w.step()
    }

    #[test]
    fn sequences_are_gap_free() {
        let mut w = RingWriter::<Vec<u8>>::with_capacity(4);
        let ring = w.ring();
        let mut seen = Vec::new();
        for i in 0..11u8 {
            assert!(write(&mut w, i, false, u64::from(i) * 40));
            seen.push(ring.last_sequence());
        }
        assert_eq!(seen, (1..=11).collect::<Vec<_>>());
        assert_eq!(w.value().sequence, 12);
        assert!(w.value().payload.is_empty());
    }

    #[tokio::test]
    async fn lapped_reader_is_discarded_not_corrupted() {
        let mut w = RingWriter::<Vec<u8>>::with_capacity(10);
        let ring = w.ring();
        let mut reader = RingReader::new(ring.clone());

        for i in 0..5u8 {
            write(&mut w, i, false, 0);
        }
        let held = ring.last_published().unwrap();
        reader.start_read(&held).await.unwrap();
        assert_eq!(reader.frame().map(|f| f.payload.clone()), Some(vec![4]));

        let mut abnormal = 0;
        for i in 5..15u8 {
            if !write(&mut w, i, false, 0) {
                abnormal += 1;
            }
        }
        assert_eq!(abnormal, 1);
        assert_eq!(ring.last_sequence(), 15);
        assert_eq!(reader.frame().map(|f| f.payload.clone()), Some(vec![4]));
        assert_eq!(reader.read_next().await, Err(RingError::Discard));
    }

    #[test]
    fn resize_draws_from_pool() {
        let mut w = RingWriter::<()>::with_capacity(10);
        w.resize(5);
        assert_eq!(w.size(), 15);
        w.resize(-5);
        assert_eq!((w.size(), w.pool_size()), (10, 5));
        w.resize(3);
        assert_eq!((w.size(), w.pool_size()), (13, 2));
    }

    #[test]
    fn ring_grows_instead_of_overwriting_latest_idr() {
        let cfg = PublishConfig {
            ring_size: SizeRange::new(4, 12),
            buffer_time: Duration::ZERO,
        };
        let mut w = RingWriter::<Vec<u8>>::new(&cfg);
        write(&mut w, 0, true, 0);
        for i in 1..4u8 {
            write(&mut w, i, false, u64::from(i) * 40);
        }
        assert_eq!(w.size(), 9);
        let ring = w.ring();
        assert_eq!(ring.latest_idr().map(|r| r.sequence()), Some(1));
        assert_eq!(ring.buffer_time(), Duration::from_millis(120));
    }

    #[test]
    fn oldest_idr_is_dropped_once_a_newer_one_covers_the_buffer() {
        let cfg = PublishConfig {
            ring_size: SizeRange::new(4, 4),
            buffer_time: Duration::ZERO,
        };
        let mut w = RingWriter::<Vec<u8>>::new(&cfg);
        let ring = w.ring();
        write(&mut w, 0, true, 0);
        write(&mut w, 1, false, 40);
        write(&mut w, 2, true, 80);
        assert_eq!(ring.oldest_idr().map(|r| r.sequence()), Some(1));
        write(&mut w, 3, false, 120);
        assert_eq!(ring.oldest_idr().map(|r| r.sequence()), Some(3));
        assert_eq!(ring.history_idr(Duration::from_millis(40)).map(|r| r.sequence()), Some(3));
        assert!(ring.history_idr(Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn dispose_closes_waiting_readers() {
        let mut w = RingWriter::<()>::with_capacity(4);
        let ring = w.ring();
        w.step();
        let mut reader = RingReader::new(ring.clone());
        let cursor = w.cursor();
        let waiting = tokio::spawn(async move { reader.start_read(&cursor).await });
        tokio::task::yield_now().await;
        w.dispose();
        let res = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res, Err(RingError::Closed));
        assert!(ring.is_closed());
    }
}
