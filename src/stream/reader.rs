//! # Sequential slot reader.
//!
//! A [`RingReader`] holds the read half of at most one slot at a time. Moving forward
//! acquires the next slot *before* releasing the current one, so the writer can never lap
//! the reader's position unnoticed: if it reaches the held slot it discards it, and the
//! reader's next move fails with [`RingError::Discard`].
//!
//! Waiting for a slot the writer is still populating suspends only the reader.

use std::sync::Arc;

use tokio::sync::OwnedRwLockReadGuard;

use super::frame::{AVFrame, Payload};
use super::ring::{Ring, Slot, SlotRef};
use crate::error::RingError;

struct Held<T> {
    at: SlotRef,
    slot: Arc<Slot<T>>,
    frame: OwnedRwLockReadGuard<AVFrame<T>>,
}

/// Reads frames from a [`Ring`] one slot at a time.
pub struct RingReader<T: Payload> {
    ring: Arc<Ring<T>>,
    current: Option<Held<T>>,
    count: usize,
}

impl<T: Payload> RingReader<T> {
    /// Attaches a reader to `ring`; it holds no slot until the first read.
    pub fn new(ring: Arc<Ring<T>>) -> Self {
        ring.attach();
        Self {
            ring,
            current: None,
            count: 0,
        }
    }

    /// The ring this reader is attached to.
    pub fn ring(&self) -> &Arc<Ring<T>> {
        &self.ring
    }

    /// Claims read access to the slot at `at`, waiting while the writer populates it.
    ///
    /// Any previously held slot is released.
    pub async fn start_read(&mut self, at: &SlotRef) -> Result<(), RingError> {
        let held = self.acquire(at).await;
        self.settle(held)
    }

    /// Moves to the slot after the current one, waiting for it to be published.
    ///
    /// Without a current slot the reader starts at the writer's cursor.
    pub async fn read_next(&mut self) -> Result<(), RingError> {
        let Some(index) = self.current_index()? else {
            let cursor = self.ring.cursor();
            return self.start_read(&cursor).await;
        };
        let (at, slot) = self.ring.next_ref(index);
        let held = lock(&self.ring, at, slot).await;
        self.settle(held)
    }

    /// Like [`read_next`](Self::read_next) but fails with [`RingError::NotReady`] instead
    /// of waiting; the current slot is kept in that case.
    pub fn try_read_next(&mut self) -> Result<(), RingError> {
        let (at, slot) = match self.current_index()? {
            Some(index) => self.ring.next_ref(index),
            None => {
                let at = self.ring.cursor();
                let slot = self.ring.resolve(&at).ok_or(RingError::Discard)?;
                (at, slot)
            }
        };
        let frame = Arc::clone(&slot.frame)
            .try_read_owned()
            .map_err(|_| RingError::NotReady)?;
        let held = validate(&self.ring, at, slot, frame);
        self.settle(held)
    }

    /// Jumps to the slot at `at`, typically a keyframe.
    pub async fn read(&mut self, at: &SlotRef) -> Result<(), RingError> {
        self.current_index()?;
        let held = self.acquire(at).await;
        self.settle(held)
    }

    /// Releases the current slot.
    pub fn stop_read(&mut self) {
        self.current = None;
    }

    /// Frame in the current slot.
    pub fn frame(&self) -> Option<&AVFrame<T>> {
        self.current.as_ref().map(|h| &*h.frame)
    }

    /// Position of the current slot.
    pub fn position(&self) -> Option<SlotRef> {
        self.current.as_ref().map(|h| h.at)
    }

    /// Number of slots claimed so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Index of the held slot; a discarded slot is released and reported.
    fn current_index(&mut self) -> Result<Option<usize>, RingError> {
        match &self.current {
            None => Ok(None),
            Some(held) if held.slot.is_discarded() => {
                self.current = None;
                Err(RingError::Discard)
            }
            Some(held) => Ok(Some(held.at.index)),
        }
    }

    async fn acquire(&self, at: &SlotRef) -> Result<Held<T>, RingError> {
        let slot = self.ring.resolve(at).ok_or(RingError::Discard)?;
        lock(&self.ring, *at, slot).await
    }

    fn settle(&mut self, held: Result<Held<T>, RingError>) -> Result<(), RingError> {
        match held {
            Ok(held) => {
                self.current = Some(held);
                self.count += 1;
                Ok(())
            }
            Err(RingError::NotReady) => Err(RingError::NotReady),
            Err(e) => {
                self.current = None;
                Err(e)
            }
        }
    }
}

impl<T: Payload> Drop for RingReader<T> {
    fn drop(&mut self) {
        self.ring.detach();
    }
}

async fn lock<T: Payload>(
    ring: &Ring<T>,
    at: SlotRef,
    slot: Arc<Slot<T>>,
) -> Result<Held<T>, RingError> {
    if slot.is_discarded() {
        return Err(RingError::Discard);
    }
    let frame = Arc::clone(&slot.frame).read_owned().await;
    validate(ring, at, slot, frame)
}

fn validate<T: Payload>(
    ring: &Ring<T>,
    mut at: SlotRef,
    slot: Arc<Slot<T>>,
    frame: OwnedRwLockReadGuard<AVFrame<T>>,
) -> Result<Held<T>, RingError> {
    if slot.is_discarded() || slot.generation() != at.generation {
        return Err(RingError::Discard);
    }
    // Only the cursor of a disposed writer is readable but unpublished.
    if frame.sequence > ring.last_sequence() {
        return Err(RingError::Closed);
    }
    at.sequence = frame.sequence;
    at.timestamp = frame.timestamp;
    Ok(Held { at, slot, frame })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::writer::RingWriter;
    use std::time::Duration;

    fn publish(w: &mut RingWriter<Vec<u32>>, n: u32) {
        for _ in 0..n {
            let frame = w.value_mut();
            let seq = frame.sequence;
            frame.payload.push(seq);
            w.step();
        }
    }

    #[tokio::test]
    async fn reads_backlog_in_order() {
        let mut w = RingWriter::<Vec<u32>>::with_capacity(16);
        let ring = w.ring();
        publish(&mut w, 3);
        let mut r = RingReader::new(ring.clone());
        r.start_read(&ring.last_published().unwrap()).await.unwrap();
        publish(&mut w, 6);

        let mut seen = vec![r.frame().unwrap().sequence];
        for _ in 0..5 {
            r.read_next().await.unwrap();
            let frame = r.frame().unwrap();
            assert_eq!(frame.payload, vec![frame.sequence]);
            seen.push(frame.sequence);
        }
        assert_eq!(seen, vec![3, 4, 5, 6, 7, 8]);
        assert_eq!(r.count(), 6);
        assert_eq!(ring.readers(), 1);
        drop(r);
        assert_eq!(ring.readers(), 0);
    }

    #[tokio::test]
    async fn try_read_next_reports_unpublished_slot() {
        let mut w = RingWriter::<Vec<u32>>::with_capacity(4);
        let ring = w.ring();
        publish(&mut w, 1);
        let mut r = RingReader::new(ring.clone());
        r.start_read(&ring.last_published().unwrap()).await.unwrap();

        assert_eq!(r.try_read_next(), Err(RingError::NotReady));
        assert_eq!(r.frame().map(|f| f.sequence), Some(1));

        publish(&mut w, 1);
        r.try_read_next().unwrap();
        assert_eq!(r.frame().map(|f| f.sequence), Some(2));
    }

    #[tokio::test]
    async fn reader_waits_for_the_writer() {
        let mut w = RingWriter::<Vec<u32>>::with_capacity(4);
        let ring = w.ring();
        let mut r = RingReader::new(ring);
        let waiting = tokio::spawn(async move {
            r.read_next().await.map(|()| r.frame().map(|f| f.payload.clone()))
        });
        tokio::task::yield_now().await;
        publish(&mut w, 1);

        let got = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Ok(Some(vec![1])));
    }

    #[tokio::test]
    async fn stale_keyframe_ref_is_discarded() {
        let mut w = RingWriter::<Vec<u32>>::with_capacity(3);
        let ring = w.ring();
        publish(&mut w, 1);
        let old = ring.last_published().unwrap();
        publish(&mut w, 3);

        let mut r = RingReader::new(ring);
        assert_eq!(r.read(&old).await, Err(RingError::Discard));
        assert!(r.frame().is_none());
    }

    #[tokio::test]
    async fn shrink_invalidates_refs_taken_before_it() {
        let mut w = RingWriter::<Vec<u32>>::with_capacity(10);
        let ring = w.ring();
        for _ in 0..2 {
            let frame = w.value_mut();
            frame.idr = true;
            let seq = frame.sequence;
            frame.payload.push(seq);
            w.step();
        }
        let old = ring.oldest_idr().unwrap();
        assert_eq!(old.sequence(), 1);

        w.resize(-8);
        assert_eq!(ring.oldest_idr().map(|r| r.sequence()), Some(2));
        let mut r = RingReader::new(ring.clone());
        assert_eq!(r.read(&old).await, Err(RingError::Discard));

        w.resize(8);
        assert_eq!(r.read(&old).await, Err(RingError::Discard));
        assert!(r.frame().is_none());

        r.start_read(&ring.oldest_idr().unwrap()).await.unwrap();
        assert_eq!(r.frame().map(|f| f.payload.clone()), Some(vec![2]));
        publish(&mut w, 1);
        r.read_next().await.unwrap();
        assert_eq!(r.frame().map(|f| (f.sequence, f.payload.clone())), Some((3, vec![3])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_ordered_frames() {
        const STEPS: u32 = 20_000;
        let mut w = RingWriter::<Vec<u32>>::with_capacity(32);
        let ring = w.ring();

        let mut readers = Vec::new();
        for pause_ms in [0u64, 0, 1, 3] {
            let mut r = RingReader::new(ring.clone());
            readers.push(tokio::spawn(async move {
                let mut last = 0u32;
                let mut frames = 0usize;
                loop {
                    match r.read_next().await {
                        Ok(()) => {
                            let frame = r.frame().unwrap();
                            assert!(frame.sequence > last, "{} after {}", frame.sequence, last);
                            assert_eq!(frame.payload, vec![frame.sequence]);
                            last = frame.sequence;
                            frames += 1;
                            if pause_ms > 0 && frames % 64 == 0 {
                                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                            }
                        }
                        Err(RingError::Discard) => continue,
                        Err(RingError::Closed) => return (frames, last),
                        Err(e) => panic!("unexpected {e}"),
                    }
                }
            }));
        }

        for i in 0..STEPS {
            publish(&mut w, 1);
            if i % 256 == 0 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(ring.last_sequence(), STEPS);
        w.dispose();

        for reader in readers {
            let (frames, last) = tokio::time::timeout(Duration::from_secs(10), reader)
                .await
                .unwrap()
                .unwrap();
            assert!(frames > 0);
            assert!(last <= STEPS);
        }
        assert!(ring.is_closed());
        assert_eq!(ring.readers(), 0);
    }
}
