//! Synchronization primitives over a shared word region.
//!
//! Every primitive in this crate keeps all of its state in a fixed range of
//! 32-bit atomic words inside a [`SharedRegion`]. Handles are cheap to clone
//! and any number of workers (threads) may hold one; the region is the only
//! thing they share.
//!
//! # Primitives
//!
//! - [`AtomicLock`]: spin-then-block mutual exclusion with owner checking
//! - [`CountingSemaphore`]: bounded permits with timed acquire
//! - [`Condition`]: wait condition paired with an [`AtomicLock`]
//! - [`BoundedBuffer`]: blocking producer/consumer buffer built on the above
//! - [`RingQueue`]: non-blocking MPMC queue with per-slot publication
//! - [`ReaderWriterLock`]: writer-preferring shared/exclusive lock
//! - [`PhaseBarrier`]: reusable barrier with a phase counter
//!
//! # Blocking
//!
//! Blocking operations spin briefly and then park on a region word (a futex
//! on Linux, a parking table elsewhere). Parks are sliced by
//! [`WaitConfig::park_slice`] so a parked worker re-checks its condition
//! periodically even without a wake.
//!
//! # Failures
//!
//! Misuse at construction and expired timed waits are [`SyncError`]s. A full
//! or empty [`RingQueue`] is reported through [`PushResult`] and `Option`.
//! Broken invariants (over-release, unlocking a lock that is not held) go
//! through [`invariant_violation`] and never return.
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to model-check the primitives:
//!
//! ```text
//! cargo test -p shm-sync --features loom
//! ```

pub mod barrier;
pub mod buffer;
pub mod condvar;
pub mod error;
pub mod futex;
pub mod lock;
pub mod record;
pub mod region;
pub mod ring;
pub mod rwlock;
pub mod semaphore;
pub mod sync;
pub mod wait;
pub mod worker;

pub use barrier::{BarrierWaitResult, PhaseBarrier};
pub use buffer::{BoundedBuffer, BufferConfig, BufferStats, WakePolicy};
pub use condvar::Condition;
pub use error::{InvariantViolation, Result, SyncError, invariant_violation};
pub use futex::WaitOutcome;
pub use lock::{AtomicLock, LockGuard};
pub use record::{Message, Record};
pub use region::{RegionError, RegionView, SharedRegion, WordRange};
pub use ring::{MAX_QUEUE_CAPACITY, PushResult, QueueStats, RingQueue};
pub use rwlock::{ReadGuard, ReaderWriterLock, WriteGuard};
pub use semaphore::{CountingSemaphore, Permit, SemaphoreStats};
pub use wait::WaitConfig;
pub use worker::{NO_WORKER, worker_token};

static_assertions::const_assert!(
    <Message as Record>::WORDS <= record::MAX_RECORD_WORDS
);
static_assertions::const_assert_eq!(
    BoundedBuffer::<u32>::words_for(1),
    AtomicLock::WORDS + 2 * Condition::WORDS + 6 + 1
);
static_assertions::const_assert_eq!(RingQueue::<Message>::words_for(1), 6 + 1 + 4);
static_assertions::assert_impl_all!(SharedRegion: Send, Sync);
static_assertions::assert_impl_all!(BoundedBuffer<Message>: Send, Sync, Clone);
static_assertions::assert_impl_all!(RingQueue<Message>: Send, Sync, Clone);
static_assertions::assert_not_impl_any!(LockGuard<'static>: Send);

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
