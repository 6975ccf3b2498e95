//! Spin-then-block mutual exclusion on region words.
//!
//! Layout (3 words):
//!
//! ```text
//! [0] state    0 = unlocked, 1 = locked
//! [1] waiters  workers currently parked in acquire
//! [2] owner    worker token of the holder, 0 when free
//! ```
//!
//! There is no fairness: a releasing worker wakes one parked worker, which
//! then races any newcomer for the lock.

use std::marker::PhantomData;

use crate::error::{InvariantViolation, Result, SyncError, invariant_violation};
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;
use crate::wait::{WaitConfig, Waiter};
use crate::worker::{NO_WORKER, worker_token};

const STATE: usize = 0;
const WAITERS: usize = 1;
const OWNER: usize = 2;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A mutex over three region words. Cloning yields another handle to the
/// same lock.
#[derive(Clone, Debug)]
pub struct AtomicLock {
    view: RegionView,
    config: WaitConfig,
}

impl AtomicLock {
    /// Words used by one lock.
    pub const WORDS: usize = 3;

    /// Create a lock in a freshly allocated region of exactly [`Self::WORDS`].
    pub fn create() -> Result<Self> {
        let region = SharedRegion::new(Self::WORDS)?;
        Self::init(&region, Some(0))
    }

    /// Initialise an unlocked lock in `region`, at `offset` if given or after
    /// the last claimed range otherwise.
    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>) -> Result<Self> {
        let view = claim_view(region, offset, Self::WORDS)?;
        Ok(Self::init_view(view))
    }

    pub(crate) fn init_view(view: RegionView) -> Self {
        view.store(STATE, UNLOCKED);
        view.store(WAITERS, 0);
        view.store(OWNER, NO_WORKER);
        tracing::debug!(start = view.range().start, "initialised lock");
        Self {
            view,
            config: WaitConfig::default(),
        }
    }

    /// Open a lock another party initialised at `offset`.
    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let view = attach_view(region, offset, Self::WORDS)?;
        let state = view.load(STATE);
        if state > LOCKED {
            return Err(SyncError::LayoutMismatch {
                what: "lock state",
                expected: LOCKED as u64,
                found: state as u64,
            });
        }
        Ok(Self {
            view,
            config: WaitConfig::default(),
        })
    }

    /// Replace the wait tuning used by [`acquire`](Self::acquire).
    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Take the lock if it is free. Never blocks.
    pub fn try_acquire(&self) -> bool {
        if self.view.compare_exchange(STATE, UNLOCKED, LOCKED).is_ok() {
            self.view.store(OWNER, worker_token());
            true
        } else {
            false
        }
    }

    /// Take the lock, spinning briefly and then parking until it is free.
    pub fn acquire(&self) {
        let mut waiter = Waiter::new(self.config, None);
        while !self.try_acquire() {
            // No deadline, so this cannot time out.
            let _ = waiter.pause(|budget| {
                self.view.fetch_add(WAITERS, 1);
                let outcome = self.view.wait(STATE, LOCKED, budget);
                self.view.fetch_sub(WAITERS, 1);
                outcome
            });
        }
    }

    /// Release the lock. Only the holder may call this.
    pub fn release(&self) {
        let caller = worker_token();
        let owner = self.view.load(OWNER);
        if owner != NO_WORKER && owner != caller {
            invariant_violation(InvariantViolation::ReleaseByNonOwner { owner, caller });
        }
        self.view.store(OWNER, NO_WORKER);

        if self.view.swap(STATE, UNLOCKED) != LOCKED {
            invariant_violation(InvariantViolation::ReleaseUnlocked);
        }

        if self.view.load(WAITERS) > 0 {
            tracing::trace!(start = self.view.range().start, "waking lock waiter");
            self.view.wake_one(STATE);
        }
    }

    /// Take the lock and return a guard that releases it on drop.
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Non-blocking [`lock`](Self::lock).
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.try_acquire().then_some(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.view.load(STATE) == LOCKED
    }

    /// Workers parked in [`acquire`](Self::acquire) right now.
    #[inline]
    pub fn waiters(&self) -> u32 {
        self.view.load(WAITERS)
    }

    /// Token of the current holder, if any.
    #[inline]
    pub fn owner(&self) -> Option<u32> {
        match self.view.load(OWNER) {
            NO_WORKER => None,
            token => Some(token),
        }
    }
}

/// Holds an [`AtomicLock`] until dropped.
///
/// Not `Send`: the lock records its holder, so the guard must be dropped on
/// the thread that took it.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a> {
    lock: &'a AtomicLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    /// The lock this guard holds.
    #[inline]
    pub fn lock(&self) -> &'a AtomicLock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
