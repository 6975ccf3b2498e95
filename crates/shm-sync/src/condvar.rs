//! Wait conditions paired with an [`AtomicLock`](crate::AtomicLock).
//!
//! Layout (2 words):
//!
//! ```text
//! [0] sequence  bumped by every signal/broadcast
//! [1] waiters   workers parked on this condition
//! ```
//!
//! A waiter reads `sequence` while still holding the lock, releases the lock,
//! and parks only while `sequence` is unchanged. A signal that lands between
//! the unlock and the park therefore cannot be lost.

use std::time::Duration;

use crate::error::Result;
use crate::futex::WaitOutcome;
use crate::lock::LockGuard;
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;

const SEQUENCE: usize = 0;
const WAITERS: usize = 1;

/// A condition variable over two region words.
#[derive(Clone, Debug)]
pub struct Condition {
    view: RegionView,
    park_slice: Option<Duration>,
}

impl Condition {
    pub const WORDS: usize = 2;

    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>) -> Result<Self> {
        let view = claim_view(region, offset, Self::WORDS)?;
        Ok(Self::init_view(view, None))
    }

    pub(crate) fn init_view(view: RegionView, park_slice: Option<Duration>) -> Self {
        view.store(SEQUENCE, 0);
        view.store(WAITERS, 0);
        Self { view, park_slice }
    }

    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let view = attach_view(region, offset, Self::WORDS)?;
        Ok(Self::attach_view(view, None))
    }

    pub(crate) fn attach_view(view: RegionView, park_slice: Option<Duration>) -> Self {
        Self { view, park_slice }
    }

    /// Release `guard`, park until signalled, and take the lock again.
    ///
    /// Wakeups may be spurious; callers re-check their predicate.
    pub fn wait<'a>(&self, guard: LockGuard<'a>) -> LockGuard<'a> {
        self.park(guard, self.park_slice).0
    }

    /// Like [`wait`](Self::wait) but parks for at most `timeout`.
    pub fn wait_for<'a>(
        &self,
        guard: LockGuard<'a>,
        timeout: Duration,
    ) -> (LockGuard<'a>, WaitOutcome) {
        let slice = match self.park_slice {
            Some(slice) => slice.min(timeout),
            None => timeout,
        };
        self.park(guard, Some(slice))
    }

    /// Wait until `condition` returns false. `condition` runs under the lock.
    pub fn wait_while<'a>(
        &self,
        mut guard: LockGuard<'a>,
        mut condition: impl FnMut() -> bool,
    ) -> LockGuard<'a> {
        while condition() {
            guard = self.wait(guard);
        }
        guard
    }

    fn park<'a>(
        &self,
        guard: LockGuard<'a>,
        timeout: Option<Duration>,
    ) -> (LockGuard<'a>, WaitOutcome) {
        let lock = guard.lock();
        let seen = self.view.load(SEQUENCE);
        self.view.fetch_add(WAITERS, 1);
        drop(guard);

        let outcome = self.view.wait(SEQUENCE, seen, timeout);

        self.view.fetch_sub(WAITERS, 1);
        (lock.lock(), outcome)
    }

    /// Wake one parked waiter, if any.
    pub fn signal(&self) {
        self.view.fetch_add(SEQUENCE, 1);
        if self.view.load(WAITERS) > 0 {
            self.view.wake_one(SEQUENCE);
        }
    }

    /// Wake every parked waiter.
    pub fn broadcast(&self) {
        self.view.fetch_add(SEQUENCE, 1);
        if self.view.load(WAITERS) > 0 {
            self.view.wake_all(SEQUENCE);
        }
    }

    /// Workers parked right now.
    #[inline]
    pub fn waiters(&self) -> u32 {
        self.view.load(WAITERS)
    }
}
