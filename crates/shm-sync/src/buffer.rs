//! Fixed-capacity blocking producer/consumer buffer.
//!
//! Layout (`13 + capacity * T::WORDS` words):
//!
//! ```text
//! [0..3)   lock          AtomicLock guarding everything below
//! [3..5)   not_empty     Condition consumers park on
//! [5..7)   not_full      Condition producers park on
//! [7]      count         items stored, 0..=capacity
//! [8]      head          next slot to take
//! [9]      tail          next slot to put
//! [10]     capacity
//! [11]     total_put     diagnostic
//! [12]     total_taken   diagnostic
//! [13..)   slots         capacity records of T::WORDS words each
//! ```
//!
//! Each slot cycles `Empty -> Filled -> Empty`. `put` blocks while the buffer
//! is full and `take` while it is empty; each signals the opposite condition
//! after it has moved an item.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::condvar::Condition;
use crate::error::{InvariantViolation, Result, SyncError, invariant_violation};
use crate::lock::{AtomicLock, LockGuard};
use crate::record::{MAX_RECORD_WORDS, Message, Record, read_record, write_record};
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;
use crate::wait::{WaitConfig, Waiter};

const LOCK: usize = 0;
const NOT_EMPTY: usize = 3;
const NOT_FULL: usize = 5;
const COUNT: usize = 7;
const HEAD: usize = 8;
const TAIL: usize = 9;
const CAPACITY: usize = 10;
const TOTAL_PUT: usize = 11;
const TOTAL_TAKEN: usize = 12;
const DATA: usize = 13;

/// How many waiters a put or take wakes on the opposite condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakePolicy {
    /// Wake a single waiter per event.
    #[default]
    One,
    /// Wake every waiter per event.
    All,
}

/// Construction-time tuning for a [`BoundedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferConfig {
    pub wait: WaitConfig,
    pub wake: WakePolicy,
}

/// Point-in-time view of a buffer's control words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub count: u32,
    pub capacity: u32,
    pub head: u32,
    pub tail: u32,
    pub total_put: u32,
    pub total_taken: u32,
    pub producers_waiting: u32,
    pub consumers_waiting: u32,
}

/// A bounded circular buffer of `T` records with blocking put/take.
pub struct BoundedBuffer<T: Record = Message> {
    view: RegionView,
    lock: AtomicLock,
    not_empty: Condition,
    not_full: Condition,
    capacity: u32,
    wake: WakePolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> BoundedBuffer<T> {
    /// Words a buffer of `capacity` records occupies.
    pub const fn words_for(capacity: u32) -> usize {
        DATA + capacity as usize * T::WORDS
    }

    /// Create an empty buffer in a fresh region sized for `capacity` items.
    pub fn create(capacity: u32) -> Result<Self> {
        Self::create_with(capacity, BufferConfig::default())
    }

    pub fn create_with(capacity: u32, config: BufferConfig) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let region = SharedRegion::new(Self::words_for(capacity))?;
        Self::init_with(&region, Some(0), capacity, config)
    }

    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>, capacity: u32) -> Result<Self> {
        Self::init_with(region, offset, capacity, BufferConfig::default())
    }

    /// Initialise an empty buffer in `region`.
    pub fn init_with(
        region: &Arc<SharedRegion>,
        offset: Option<usize>,
        capacity: u32,
        config: BufferConfig,
    ) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let view = claim_view(region, offset, Self::words_for(capacity))?;

        let lock = AtomicLock::init_view(view.sub(LOCK, AtomicLock::WORDS)).with_config(config.wait);
        let not_empty =
            Condition::init_view(view.sub(NOT_EMPTY, Condition::WORDS), config.wait.park_slice);
        let not_full =
            Condition::init_view(view.sub(NOT_FULL, Condition::WORDS), config.wait.park_slice);
        for word in [COUNT, HEAD, TAIL, TOTAL_PUT, TOTAL_TAKEN] {
            view.store(word, 0);
        }
        view.store(CAPACITY, capacity);
        for slot in DATA..Self::words_for(capacity) {
            view.store(slot, 0);
        }

        tracing::debug!(
            start = view.range().start,
            capacity,
            record_words = T::WORDS,
            "initialised bounded buffer"
        );
        Ok(Self {
            view,
            lock,
            not_empty,
            not_full,
            capacity,
            wake: config.wake,
            _marker: PhantomData,
        })
    }

    /// Open a buffer another party initialised at `offset`.
    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        Self::attach_with(region, offset, BufferConfig::default())
    }

    pub fn attach_with(region: &Arc<SharedRegion>, offset: usize, config: BufferConfig) -> Result<Self> {
        let header = attach_view(region, offset, DATA)?;
        let capacity = header.load(CAPACITY);
        Self::check_capacity(capacity)?;
        let view = attach_view(region, offset, Self::words_for(capacity))?;

        let count = view.load(COUNT);
        if count > capacity {
            return Err(SyncError::LayoutMismatch {
                what: "buffer count",
                expected: capacity as u64,
                found: count as u64,
            });
        }

        let lock = AtomicLock::attach(region, offset + LOCK)?.with_config(config.wait);
        let not_empty =
            Condition::attach_view(view.sub(NOT_EMPTY, Condition::WORDS), config.wait.park_slice);
        let not_full =
            Condition::attach_view(view.sub(NOT_FULL, Condition::WORDS), config.wait.park_slice);
        Ok(Self {
            view,
            lock,
            not_empty,
            not_full,
            capacity,
            wake: config.wake,
            _marker: PhantomData,
        })
    }

    fn check_capacity(capacity: u32) -> Result<()> {
        if capacity == 0 {
            return Err(SyncError::invalid_capacity("buffer capacity", capacity));
        }
        if T::WORDS == 0 || T::WORDS > MAX_RECORD_WORDS {
            return Err(SyncError::invalid_capacity("record words", T::WORDS as u64));
        }
        Ok(())
    }

    /// Store `item`, blocking while the buffer is full.
    pub fn put(&self, item: T) {
        let guard = self.lock.lock();
        let guard = self
            .not_full
            .wait_while(guard, || self.view.load(COUNT) == self.capacity);
        self.put_locked(guard, item);
    }

    /// Store `item`, giving up with [`SyncError::Timeout`] after `timeout`.
    pub fn put_for(&self, item: T, timeout: Duration) -> Result<()> {
        let guard = self.lock.lock();
        let guard = self.wait_until(guard, &self.not_full, timeout, || {
            self.view.load(COUNT) == self.capacity
        })?;
        self.put_locked(guard, item);
        Ok(())
    }

    /// Remove the oldest item, blocking while the buffer is empty.
    pub fn take(&self) -> T {
        let guard = self.lock.lock();
        let guard = self
            .not_empty
            .wait_while(guard, || self.view.load(COUNT) == 0);
        self.take_locked(guard)
    }

    /// Remove the oldest item, giving up with [`SyncError::Timeout`] after `timeout`.
    pub fn take_for(&self, timeout: Duration) -> Result<T> {
        let guard = self.lock.lock();
        let guard = self.wait_until(guard, &self.not_empty, timeout, || {
            self.view.load(COUNT) == 0
        })?;
        Ok(self.take_locked(guard))
    }

    fn wait_until<'a>(
        &self,
        mut guard: LockGuard<'a>,
        cond: &Condition,
        timeout: Duration,
        blocked: impl Fn() -> bool,
    ) -> Result<LockGuard<'a>> {
        // The condition applies its own park slice; the waiter only tracks the deadline.
        let waiter = Waiter::new(
            WaitConfig {
                spin_limit: 0,
                park_slice: None,
            },
            Some(timeout),
        );
        while blocked() {
            let budget = match waiter.remaining() {
                Ok(budget) => budget,
                Err(err) => {
                    drop(guard);
                    tracing::warn!(
                        start = self.view.range().start,
                        waited = ?waiter.elapsed(),
                        "bounded buffer wait timed out"
                    );
                    return Err(err);
                }
            };
            guard = match budget {
                Some(left) => cond.wait_for(guard, left).0,
                None => cond.wait(guard),
            };
        }
        Ok(guard)
    }

    fn put_locked(&self, guard: LockGuard<'_>, item: T) {
        let count = self.view.load(COUNT);
        if count >= self.capacity {
            invariant_violation(InvariantViolation::CountOutOfRange {
                count: count + 1,
                capacity: self.capacity,
            });
        }
        let tail = self.view.load(TAIL);
        write_record(&self.view, self.slot(tail), &item);
        self.view.store(TAIL, (tail + 1) % self.capacity);
        self.view.store(COUNT, count + 1);
        self.view.fetch_add(TOTAL_PUT, 1);
        self.debug_check_cursors();

        self.notify(&self.not_empty);
        drop(guard);
    }

    fn take_locked(&self, guard: LockGuard<'_>) -> T {
        let count = self.view.load(COUNT);
        if count == 0 || count > self.capacity {
            invariant_violation(InvariantViolation::CountOutOfRange {
                count,
                capacity: self.capacity,
            });
        }
        let head = self.view.load(HEAD);
        let item = read_record(&self.view, self.slot(head));
        self.view.store(HEAD, (head + 1) % self.capacity);
        self.view.store(COUNT, count - 1);
        self.view.fetch_add(TOTAL_TAKEN, 1);
        self.debug_check_cursors();

        self.notify(&self.not_full);
        drop(guard);
        item
    }

    #[inline]
    fn slot(&self, index: u32) -> usize {
        DATA + index as usize * T::WORDS
    }

    fn notify(&self, cond: &Condition) {
        match self.wake {
            WakePolicy::One => cond.signal(),
            WakePolicy::All => cond.broadcast(),
        }
    }

    fn debug_check_cursors(&self) {
        if cfg!(debug_assertions) {
            let (count, head, tail) = (
                self.view.load(COUNT),
                self.view.load(HEAD),
                self.view.load(TAIL),
            );
            let expected = (tail + self.capacity - head) % self.capacity;
            let consistent = if head == tail {
                count == 0 || count == self.capacity
            } else {
                count == expected
            };
            debug_assert!(
                consistent,
                "buffer cursors disagree: count={} head={} tail={} capacity={}",
                count, head, tail, self.capacity
            );
        }
    }

    /// Items stored right now.
    #[inline]
    pub fn current_count(&self) -> u32 {
        self.view.load(COUNT)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.current_count() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.current_count() == self.capacity
    }

    /// The region words this buffer occupies.
    pub fn view(&self) -> &RegionView {
        &self.view
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            count: self.view.load(COUNT),
            capacity: self.capacity,
            head: self.view.load(HEAD),
            tail: self.view.load(TAIL),
            total_put: self.view.load(TOTAL_PUT),
            total_taken: self.view.load(TOTAL_TAKEN),
            producers_waiting: self.not_full.waiters(),
            consumers_waiting: self.not_empty.waiters(),
        }
    }
}

impl<T: Record> Clone for BoundedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            lock: self.lock.clone(),
            not_empty: self.not_empty.clone(),
            not_full: self.not_full.clone(),
            capacity: self.capacity,
            wake: self.wake,
            _marker: PhantomData,
        }
    }
}

impl<T: Record> fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedBuffer")
            .field("view", &self.view)
            .field("capacity", &self.capacity)
            .field("count", &self.current_count())
            .field("wake", &self.wake)
            .finish()
    }
}
