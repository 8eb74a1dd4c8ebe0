//! # Slot arena shared by a writer and its readers.
//!
//! The ring is a set of slots addressed by index, linked into a cycle by a `next` table.
//! The writer owns the link table (behind a short-lived lock) and the free list of
//! detached indices. Each slot guards its frame with an [`RwLock`]: the writer holds the
//! write half while populating the slot, readers share the read half afterwards.
//!
//! Slots are never mutated under a reader. When the writer reaches a slot that a reader
//! still holds, the slot is **discarded**: flagged, removed from the arena and replaced by
//! a fresh one at the same index. The reader keeps its `Arc` to the old slot until it
//! moves on and then gets [`RingError::Discard`](crate::RingError::Discard).
//!
//! A [`SlotRef`] names a slot as `(index, generation)`. A slot gets a new generation each
//! time the writer claims it, unlinks it or links it back from the free list, so a stale
//! ref (for example an old keyframe position taken before a shrink) is detected instead of
//! silently reading another frame.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock as IndexLock;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::frame::{AVFrame, Payload};

/// Position of a slot as seen at a given point in the writer's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    pub(crate) index: usize,
    pub(crate) generation: u64,
    pub(crate) sequence: u32,
    pub(crate) timestamp: Duration,
}

impl SlotRef {
    /// Sequence of the frame in the slot when the ref was taken.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Timestamp of the frame in the slot when the ref was taken.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

pub(crate) struct Slot<T> {
    pub(crate) frame: Arc<RwLock<AVFrame<T>>>,
    generation: AtomicU64,
    discarded: AtomicBool,
}

impl<T: Payload> Slot<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frame: Arc::new(RwLock::new(AVFrame::default())),
            generation: AtomicU64::new(0),
            discarded: AtomicBool::new(false),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    /// Claims the slot for writing; fails while any reader holds it.
    pub(crate) fn try_claim(&self) -> Option<OwnedRwLockWriteGuard<AVFrame<T>>> {
        Arc::clone(&self.frame).try_write_owned().ok()
    }
}

/// Link table, free list and keyframe index; writer-owned.
pub(crate) struct Links<T> {
    pub(crate) slots: Vec<Arc<Slot<T>>>,
    generation: u64,
    pub(crate) next: Vec<usize>,
    pub(crate) cursor: usize,
    pub(crate) last: Option<usize>,
    pub(crate) pool: Vec<usize>,
    pub(crate) size: usize,
    pub(crate) idr: VecDeque<SlotRef>,
}

impl<T: Payload> Links<T> {
    fn new(n: usize) -> Self {
        let n = n.max(2);
        Self {
            slots: (0..n).map(|_| Slot::new()).collect(),
            generation: 0,
            next: (0..n).map(|i| (i + 1) % n).collect(),
            cursor: 0,
            last: None,
            pool: Vec::new(),
            size: n,
            idr: VecDeque::new(),
        }
    }

    pub(crate) fn next_of(&self, index: usize) -> usize {
        self.next[index]
    }

    /// Links `k` slots right after the cursor, reusing free indices first.
    pub(crate) fn glow(&mut self, k: usize) {
        if k == 0 {
            return;
        }
        let after = self.next[self.cursor];
        let mut prev = self.cursor;
        for _ in 0..k {
            let index = self.pool.pop().unwrap_or_else(|| self.alloc());
            self.stamp(index);
            self.next[prev] = index;
            prev = index;
        }
        self.next[prev] = after;
        self.size += k;
    }

    /// Unlinks up to `k` slots after the cursor, keeping at least two in the ring.
    ///
    /// Returns how many of them were still held by readers and had to be discarded.
    pub(crate) fn reduce(&mut self, k: usize) -> usize {
        let k = k.min(self.size.saturating_sub(2));
        let mut discarded = 0;
        for _ in 0..k {
            let index = self.next[self.cursor];
            self.next[self.cursor] = self.next[index];
            self.size -= 1;
            self.forget_idr(index);
            match self.slots[index].try_claim() {
                Some(mut frame) => {
                    frame.reset();
                    drop(frame);
                    self.stamp(index);
                }
                None => {
                    self.replace(index);
                    discarded += 1;
                }
            }
            self.pool.push(index);
        }
        discarded
    }

    /// Flags the slot at `index` as discarded and puts a fresh one in its place.
    pub(crate) fn replace(&mut self, index: usize) -> Arc<Slot<T>> {
        self.slots[index].discarded.store(true, Ordering::Release);
        let fresh = Slot::new();
        self.slots[index] = Arc::clone(&fresh);
        self.stamp(index);
        fresh
    }

    /// Gives the slot at `index` a generation no existing ref carries.
    pub(crate) fn stamp(&mut self, index: usize) {
        self.generation += 1;
        self.slots[index]
            .generation
            .store(self.generation, Ordering::Release);
    }

    pub(crate) fn forget_idr(&mut self, index: usize) {
        self.idr.retain(|r| r.index != index);
    }

    fn alloc(&mut self) -> usize {
        self.slots.push(Slot::new());
        self.next.push(0);
        self.slots.len() - 1
    }
}

/// Read-side view of a ring, shared between the writer and every reader.
pub struct Ring<T> {
    pub(crate) links: IndexLock<Links<T>>,
    last_sequence: AtomicU32,
    last_timestamp: AtomicU64,
    buffer_time: AtomicU64,
    readers: AtomicUsize,
    closed: AtomicBool,
}

impl<T: Payload> Ring<T> {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            links: IndexLock::new(Links::new(n)),
            last_sequence: AtomicU32::new(0),
            last_timestamp: AtomicU64::new(0),
            buffer_time: AtomicU64::new(0),
            readers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Sequence of the last published frame (`0` before the first step).
    pub fn last_sequence(&self) -> u32 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Timestamp of the last published frame.
    pub fn last_timestamp(&self) -> Duration {
        Duration::from_nanos(self.last_timestamp.load(Ordering::Acquire))
    }

    /// Number of slots currently linked into the ring.
    pub fn size(&self) -> usize {
        self.links.read().size
    }

    /// Most recent keyframe still in the ring.
    pub fn latest_idr(&self) -> Option<SlotRef> {
        self.links.read().idr.back().copied()
    }

    /// Oldest keyframe still in the ring.
    pub fn oldest_idr(&self) -> Option<SlotRef> {
        self.links.read().idr.front().copied()
    }

    /// Newest keyframe that lies at least `buffer` behind the last published frame.
    pub fn history_idr(&self, buffer: Duration) -> Option<SlotRef> {
        let last = self.last_timestamp();
        self.links
            .read()
            .idr
            .iter()
            .rev()
            .find(|r| last.saturating_sub(r.timestamp) >= buffer)
            .copied()
    }

    /// Media time between the oldest keyframe and the last published frame.
    pub fn buffer_time(&self) -> Duration {
        Duration::from_nanos(self.buffer_time.load(Ordering::Acquire))
    }

    /// Number of attached readers.
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// True once the writer was disposed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The slot the writer is populating; readers starting here wait for it.
    pub fn cursor(&self) -> SlotRef {
        let links = self.links.read();
        let slot = &links.slots[links.cursor];
        SlotRef {
            index: links.cursor,
            generation: slot.generation(),
            sequence: self.last_sequence() + 1,
            timestamp: Duration::ZERO,
        }
    }

    /// The slot holding the last published frame.
    pub fn last_published(&self) -> Option<SlotRef> {
        let links = self.links.read();
        let index = links.last?;
        Some(SlotRef {
            index,
            generation: links.slots[index].generation(),
            sequence: self.last_sequence(),
            timestamp: self.last_timestamp(),
        })
    }

    /// Resolves `r` to its slot if the slot still carries the same generation.
    pub(crate) fn resolve(&self, r: &SlotRef) -> Option<Arc<Slot<T>>> {
        let links = self.links.read();
        let slot = links.slots.get(r.index)?;
        (slot.generation() == r.generation).then(|| Arc::clone(slot))
    }

    /// Ref to the slot linked after `index`.
    pub(crate) fn next_ref(&self, index: usize) -> (SlotRef, Arc<Slot<T>>) {
        let links = self.links.read();
        let next = links.next_of(index);
        let slot = Arc::clone(&links.slots[next]);
        let r = SlotRef {
            index: next,
            generation: slot.generation(),
            sequence: 0,
            timestamp: Duration::ZERO,
        };
        (r, slot)
    }

    pub(crate) fn publish(&self, sequence: u32, timestamp: Duration) {
        self.last_timestamp
            .store(timestamp.as_nanos() as u64, Ordering::Release);
        self.last_sequence.store(sequence, Ordering::Release);
    }

    pub(crate) fn set_buffer_time(&self, d: Duration) {
        self.buffer_time
            .store(d.as_nanos() as u64, Ordering::Release);
    }

    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn attach(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach(&self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: Payload> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("size", &self.size())
            .field("last_sequence", &self.last_sequence())
            .field("readers", &self.readers())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(links: &Links<()>) -> Vec<usize> {
        let mut out = vec![links.cursor];
        let mut i = links.next_of(links.cursor);
        while i != links.cursor {
            out.push(i);
            i = links.next_of(i);
        }
        out
    }

    #[test]
    fn glow_reuses_free_indices_before_allocating() {
        let mut links: Links<()> = Links::new(4);
        assert_eq!(links.reduce(2), 0);
        assert_eq!(links.size, 2);
        assert_eq!(links.pool.len(), 2);

        links.glow(3);
        assert_eq!(links.size, 5);
        assert!(links.pool.is_empty());
        assert_eq!(links.slots.len(), 5);
        assert_eq!(walk(&links).len(), 5);
    }

    #[test]
    fn reduce_discards_slots_held_by_readers() {
        let mut links: Links<()> = Links::new(4);
        let held = Arc::clone(&links.slots[1]);
        let _guard = Arc::clone(&held.frame).try_read_owned().unwrap();

        assert_eq!(links.reduce(1), 1);
        assert!(held.is_discarded());
        assert!(!Arc::ptr_eq(&held, &links.slots[1]));
        assert_eq!(walk(&links), vec![0, 2, 3]);
    }

    #[test]
    fn reduce_keeps_two_slots() {
        let mut links: Links<()> = Links::new(3);
        links.reduce(10);
        assert_eq!(links.size, 2);
    }

    #[test]
    fn stale_generation_does_not_resolve() {
        let ring: Ring<()> = Ring::new(3);
        let r = ring.cursor();
        assert!(ring.resolve(&r).is_some());
        ring.links.write().stamp(r.index);
        assert!(ring.resolve(&r).is_none());
    }

    #[test]
    fn unlinked_and_relinked_slots_get_new_generations() {
        let mut links: Links<()> = Links::new(4);
        for i in 0..4 {
            links.stamp(i);
        }
        let before: Vec<u64> = links.slots.iter().map(|s| s.generation()).collect();

        links.reduce(2);
        let after_reduce: Vec<u64> = links.slots.iter().map(|s| s.generation()).collect();
        assert_eq!(after_reduce[0], before[0]);
        assert_ne!(after_reduce[1], before[1]);
        assert_ne!(after_reduce[2], before[2]);
        assert_eq!(after_reduce[3], before[3]);

        links.glow(2);
        for i in [1, 2] {
            assert_ne!(links.slots[i].generation(), after_reduce[i]);
        }
    }
}
