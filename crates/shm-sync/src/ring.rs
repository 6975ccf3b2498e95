//! Multi-producer multi-consumer ring queue.
//!
//! Layout (`6 + capacity * (1 + T::WORDS)` words):
//!
//! ```text
//! [0]      read_pos        consumer cursor, 0..span
//! [1]      write_pos       producer cursor, 0..span
//! [2]      capacity
//! [3]      total_sent      diagnostic
//! [4]      total_received  diagnostic
//! [5]      full_events     diagnostic: enqueues refused as Full
//! [6..)    slots           per slot: [turn, record words...]
//! ```
//!
//! Cursors wrap at `span`, the largest multiple of `capacity` that does not
//! exceed 2^31, so `pos % capacity` stays continuous across the wrap for any
//! capacity.
//!
//! Each slot's `turn` word says who may touch it next. For cursor position
//! `pos` on lap `lap = pos / capacity`:
//!
//! ```text
//! turn == 2 * lap        free: the producer reserving `pos` may write
//! turn == 2 * lap + 1    published: the consumer reserving `pos` may read
//! turn == 2 * lap + 2    consumed: free for the producer one lap later
//! ```
//!
//! A producer reserves by CAS on `write_pos`, writes the record, and only
//! then stores the published turn. Consumers claim a slot only when its turn
//! says published, so a reserved-but-unwritten slot is never read.
//! Neither side blocks: a full queue is reported as [`PushResult::Full`] and
//! an empty one as `None`.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{InvariantViolation, Result, SyncError, invariant_violation};
use crate::record::{MAX_RECORD_WORDS, Message, Record, read_record, write_record};
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;

const READ_POS: usize = 0;
const WRITE_POS: usize = 1;
const CAPACITY: usize = 2;
const TOTAL_SENT: usize = 3;
const TOTAL_RECEIVED: usize = 4;
const FULL_EVENTS: usize = 5;
const SLOTS: usize = 6;

/// Largest supported capacity. Leaves at least four laps in the cursor span,
/// so a slot one lap behind never reads as one lap ahead.
pub const MAX_QUEUE_CAPACITY: u32 = 1 << 29;

const CURSOR_LIMIT: u64 = 1 << 31;

/// Outcome of [`RingQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PushResult {
    Ok,
    /// Every slot is occupied. The item was not stored.
    Full,
}

impl PushResult {
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, PushResult::Ok)
    }

    #[inline]
    pub fn is_full(self) -> bool {
        matches!(self, PushResult::Full)
    }
}

/// Point-in-time view of a queue's cursors and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub read_pos: u32,
    pub write_pos: u32,
    pub capacity: u32,
    pub len: u32,
    pub total_sent: u32,
    pub total_received: u32,
    pub full_events: u32,
}

/// Cursor span for `capacity`: the largest multiple of it not above 2^31.
#[inline]
pub(crate) fn span_for(capacity: u32) -> u32 {
    let capacity = capacity as u64;
    ((CURSOR_LIMIT / capacity) * capacity) as u32
}

/// Signed `a - b` on a circle of `modulus` points, in `(-modulus/2, modulus/2]`.
#[inline]
fn circular_distance(a: u64, b: u64, modulus: u64) -> i64 {
    let m = modulus as i64;
    let d = (a as i64 - b as i64).rem_euclid(m);
    if d > m / 2 { d - m } else { d }
}

/// A non-blocking bounded MPMC queue of `T` records.
pub struct RingQueue<T: Record = Message> {
    view: RegionView,
    capacity: u32,
    span: u32,
    /// Number of distinct turn values: two per lap.
    turns: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> RingQueue<T> {
    const STRIDE: usize = 1 + T::WORDS;

    /// Words a queue of `capacity` records occupies.
    pub const fn words_for(capacity: u32) -> usize {
        SLOTS + capacity as usize * Self::STRIDE
    }

    /// Create an empty queue in a fresh region.
    pub fn create(capacity: u32) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let region = SharedRegion::new(Self::words_for(capacity))?;
        Self::init(&region, Some(0), capacity)
    }

    /// Initialise an empty queue in `region`.
    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>, capacity: u32) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let view = claim_view(region, offset, Self::words_for(capacity))?;
        for word in [READ_POS, WRITE_POS, TOTAL_SENT, TOTAL_RECEIVED, FULL_EVENTS] {
            view.store(word, 0);
        }
        view.store(CAPACITY, capacity);
        // Turn 0 is "free on lap 0" for every slot.
        for word in SLOTS..Self::words_for(capacity) {
            view.store(word, 0);
        }

        let queue = Self::from_view(view, capacity);
        tracing::debug!(
            start = queue.view.range().start,
            capacity,
            span = queue.span,
            record_words = T::WORDS,
            "initialised ring queue"
        );
        Ok(queue)
    }

    /// Open a queue another party initialised at `offset`.
    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let header = attach_view(region, offset, SLOTS)?;
        let capacity = header.load(CAPACITY);
        Self::check_capacity(capacity)?;
        let view = attach_view(region, offset, Self::words_for(capacity))?;

        let queue = Self::from_view(view, capacity);
        for cursor in [READ_POS, WRITE_POS] {
            let pos = queue.view.load(cursor);
            if pos >= queue.span {
                return Err(SyncError::LayoutMismatch {
                    what: "queue cursor",
                    expected: queue.span as u64 - 1,
                    found: pos as u64,
                });
            }
        }
        Ok(queue)
    }

    fn from_view(view: RegionView, capacity: u32) -> Self {
        let span = span_for(capacity);
        Self {
            view,
            capacity,
            span,
            turns: 2 * (span / capacity) as u64,
            _marker: PhantomData,
        }
    }

    fn check_capacity(capacity: u32) -> Result<()> {
        if capacity == 0 || capacity > MAX_QUEUE_CAPACITY {
            return Err(SyncError::invalid_capacity("queue capacity", capacity));
        }
        if T::WORDS == 0 || T::WORDS > MAX_RECORD_WORDS {
            return Err(SyncError::invalid_capacity("record words", T::WORDS as u64));
        }
        Ok(())
    }

    #[inline]
    fn next(&self, pos: u32) -> u32 {
        let next = pos + 1;
        if next == self.span { 0 } else { next }
    }

    /// Relative index of the turn word for cursor position `pos`.
    #[inline]
    fn turn_word(&self, pos: u32) -> usize {
        SLOTS + (pos % self.capacity) as usize * Self::STRIDE
    }

    /// Turn at which the producer reserving `pos` may write.
    #[inline]
    fn free_turn(&self, pos: u32) -> u64 {
        2 * (pos / self.capacity) as u64
    }

    #[inline]
    fn turn_distance(&self, turn: u32, expected: u64) -> i64 {
        circular_distance(turn as u64, expected, self.turns)
    }

    /// Try to append `item`. Never blocks.
    pub fn enqueue(&self, item: T) -> PushResult {
        let mut pos = self.view.load(WRITE_POS);
        loop {
            let turn_word = self.turn_word(pos);
            let free = self.free_turn(pos);
            let dist = self.turn_distance(self.view.load(turn_word), free);

            if dist == 0 {
                match self.view.compare_exchange(WRITE_POS, pos, self.next(pos)) {
                    Ok(_) => {
                        write_record(&self.view, turn_word + 1, &item);
                        // Publish only after the record is fully written.
                        self.view.store(turn_word, (free + 1) as u32);
                        self.view.fetch_add(TOTAL_SENT, 1);
                        return PushResult::Ok;
                    }
                    Err(found) => pos = found,
                }
            } else if dist < 0 {
                // The slot still holds last lap's unconsumed record.
                self.view.fetch_add(FULL_EVENTS, 1);
                tracing::trace!(start = self.view.range().start, pos, "ring queue full");
                return PushResult::Full;
            } else {
                pos = self.view.load(WRITE_POS);
            }
        }
    }

    /// Try to remove the oldest published item. Never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let mut pos = self.view.load(READ_POS);
        loop {
            let turn_word = self.turn_word(pos);
            let published = self.free_turn(pos) + 1;
            let dist = self.turn_distance(self.view.load(turn_word), published);

            if dist == 0 {
                match self.view.compare_exchange(READ_POS, pos, self.next(pos)) {
                    Ok(_) => {
                        let item = read_record(&self.view, turn_word + 1);
                        self.view
                            .store(turn_word, ((published + 1) % self.turns) as u32);
                        self.view.fetch_add(TOTAL_RECEIVED, 1);
                        return Some(item);
                    }
                    Err(found) => pos = found,
                }
            } else if dist < 0 {
                // Not yet published: empty, or a producer is mid-write.
                return None;
            } else {
                pos = self.view.load(READ_POS);
            }
        }
    }

    /// Reserved-but-not-dequeued items, `write_pos - read_pos`.
    ///
    /// Reads `read_pos` on both sides of `write_pos` so the pair comes from a
    /// single instant. A result outside `[0, capacity]` is an invariant
    /// violation.
    pub fn queue_length(&self) -> u32 {
        self.cursor_snapshot().2
    }

    fn cursor_snapshot(&self) -> (u32, u32, u32) {
        loop {
            let read = self.view.load(READ_POS);
            let write = self.view.load(WRITE_POS);
            if self.view.load(READ_POS) != read {
                continue;
            }
            let len = circular_distance(write as u64, read as u64, self.span as u64);
            if len < 0 || len > self.capacity as i64 {
                invariant_violation(InvariantViolation::CursorOutOfRange {
                    len,
                    capacity: self.capacity,
                });
            }
            return (read, write, len as u32);
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue_length() == 0
    }

    /// The region words this queue occupies.
    pub fn view(&self) -> &RegionView {
        &self.view
    }

    pub fn stats(&self) -> QueueStats {
        let (read_pos, write_pos, len) = self.cursor_snapshot();
        QueueStats {
            read_pos,
            write_pos,
            capacity: self.capacity,
            len,
            total_sent: self.view.load(TOTAL_SENT),
            total_received: self.view.load(TOTAL_RECEIVED),
            full_events: self.view.load(FULL_EVENTS),
        }
    }
}

impl<T: Record> Clone for RingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            capacity: self.capacity,
            span: self.span,
            turns: self.turns,
            _marker: PhantomData,
        }
    }
}

impl<T: Record> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("view", &self.view)
            .field("capacity", &self.capacity)
            .field("span", &self.span)
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    #[test]
    fn capacity_bounds() {
        assert!(RingQueue::<u32>::create(0).is_err());
        assert!(matches!(
            RingQueue::<u32>::init(&SharedRegion::new(8).unwrap(), None, MAX_QUEUE_CAPACITY + 1),
            Err(SyncError::InvalidCapacity { what: "queue capacity", .. })
        ));
        assert!(matches!(
            RingQueue::<u32>::create(1 << 30),
            Err(SyncError::InvalidCapacity { what: "queue capacity", .. })
        ));
    }

    #[test]
    fn every_capacity_gets_four_laps() {
        for capacity in [1, 3, MAX_QUEUE_CAPACITY / 3, MAX_QUEUE_CAPACITY - 1, MAX_QUEUE_CAPACITY] {
            assert!(span_for(capacity) / capacity >= 4, "capacity {capacity}");
        }
    }

    #[test]
    fn unpublished_slot_from_last_lap_is_full() {
        let q = RingQueue::<u32>::create(2).unwrap();
        // A producer reserved position 0 and has not published yet.
        q.view.store(WRITE_POS, 2);
        assert!(q.enqueue(7).is_full());
        assert_eq!(q.view.load(WRITE_POS), 2);
        assert_eq!(q.stats().full_events, 1);
    }

    #[test]
    fn span_is_a_multiple_of_capacity() {
        assert_eq!(span_for(1), 1 << 31);
        assert_eq!(span_for(4), 1 << 31);
        assert_eq!(span_for(3), 2_147_483_646);
        assert_eq!(span_for(MAX_QUEUE_CAPACITY), 1 << 31);
        assert_eq!(span_for(MAX_QUEUE_CAPACITY - 1) % (MAX_QUEUE_CAPACITY - 1), 0);
    }

    #[test]
    fn circular_distance_signs() {
        assert_eq!(circular_distance(5, 3, 8), 2);
        assert_eq!(circular_distance(3, 5, 8), -2);
        assert_eq!(circular_distance(0, 7, 8), 1);
        assert_eq!(circular_distance(7, 0, 8), -1);
    }

    #[test]
    fn full_and_empty_are_reported() {
        let q = RingQueue::<u32>::create(2).unwrap();
        assert_eq!(q.dequeue(), None);
        assert!(q.enqueue(1).is_ok());
        assert!(q.enqueue(2).is_ok());
        assert!(q.enqueue(3).is_full());
        assert_eq!(q.queue_length(), 2);
        assert_eq!(q.dequeue(), Some(1));
        assert!(q.enqueue(3).is_ok());
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);

        let stats = q.stats();
        assert_eq!(stats.total_sent, 3);
        assert_eq!(stats.total_received, 3);
        assert_eq!(stats.full_events, 1);
        assert_eq!(stats.len, 0);
    }

    #[test]
    fn capacity_one_alternates() {
        let q = RingQueue::<u32>::create(1).unwrap();
        for i in 0..10 {
            assert!(q.enqueue(i).is_ok());
            assert!(q.enqueue(i + 100).is_full());
            assert_eq!(q.dequeue(), Some(i));
            assert_eq!(q.dequeue(), None);
        }
    }

    #[test]
    fn cursors_wrap_at_span() {
        let capacity = 3;
        let q = RingQueue::<u32>::create(capacity).unwrap();
        let span = span_for(capacity);
        let start = span - 1;

        // Fast-forward an empty queue to one step before the wrap.
        q.view.store(READ_POS, start);
        q.view.store(WRITE_POS, start);
        for pos in [start - 2, start - 1] {
            q.view.store(q.turn_word(pos), 0);
        }
        q.view.store(q.turn_word(start), q.free_turn(start) as u32);

        for i in 0..3 {
            assert!(q.enqueue(i).is_ok());
        }
        assert!(q.enqueue(99).is_full());
        assert_eq!(q.queue_length(), 3);
        assert_eq!(q.view.load(WRITE_POS), 2);

        for i in 0..3 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert_eq!(q.dequeue(), None);
        assert_eq!(q.view.load(READ_POS), 2);
    }

    #[test]
    fn attach_rejects_cursor_past_span() {
        let region = SharedRegion::new(RingQueue::<u32>::words_for(4)).unwrap();
        RingQueue::<u32>::init(&region, Some(0), 4).unwrap();
        region.store(WRITE_POS, u32::MAX);
        assert!(matches!(
            RingQueue::<u32>::attach(&region, 0),
            Err(SyncError::LayoutMismatch { what: "queue cursor", .. })
        ));
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let q = RingQueue::<Message>::create(8).unwrap();
        let producers = 3u32;
        let per_producer = 2_000u32;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        while q.enqueue(Message::new(0, p, seq)).is_full() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut last: HashMap<u32, u32> = HashMap::new();
        let mut received = 0;
        while received < producers * per_producer {
            match q.dequeue() {
                Some(msg) => {
                    if let Some(prev) = last.insert(msg.producer, msg.payload) {
                        assert!(msg.payload > prev, "producer {} reordered", msg.producer);
                    }
                    received += 1;
                }
                None => thread::yield_now(),
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.dequeue(), None);
        assert!(last.values().all(|&v| v == per_producer - 1));
    }
}
