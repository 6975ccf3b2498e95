//! Counting semaphore on region words.
//!
//! Layout (4 words):
//!
//! ```text
//! [0] permits       available permits, 0..=max_permits
//! [1] waiting       workers parked in acquire (diagnostic)
//! [2] max_observed  high-water mark of permits held at once (diagnostic)
//! [3] max_permits   fixed at init
//! ```
//!
//! Permits are taken with a CAS decrement and returned with a CAS increment
//! that refuses to pass `max_permits`. Blocked acquirers park on the
//! `permits` word while it reads zero. Waiters are not queued: whoever wins
//! the CAS after a release gets the permit.

use std::time::Duration;

use crate::error::{InvariantViolation, Result, SyncError, invariant_violation};
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;
use crate::wait::{WaitConfig, Waiter};

const PERMITS: usize = 0;
const WAITING: usize = 1;
const MAX_OBSERVED: usize = 2;
const MAX_PERMITS: usize = 3;

/// A counting semaphore. Cloning yields another handle to the same permits.
#[derive(Clone, Debug)]
pub struct CountingSemaphore {
    view: RegionView,
    max_permits: u32,
    config: WaitConfig,
}

/// Point-in-time view of a semaphore's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreStats {
    pub permits: u32,
    pub max_permits: u32,
    pub waiting: u32,
    pub max_observed: u32,
}

impl SemaphoreStats {
    /// Permits currently held.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.max_permits.saturating_sub(self.permits)
    }
}

impl CountingSemaphore {
    /// Words used by one semaphore.
    pub const WORDS: usize = 4;

    /// Create a semaphore with `max_permits` permits in a fresh region.
    pub fn create(max_permits: u32) -> Result<Self> {
        if max_permits == 0 {
            return Err(SyncError::invalid_capacity("max_permits", max_permits));
        }
        let region = SharedRegion::new(Self::WORDS)?;
        Self::init(&region, Some(0), max_permits)
    }

    /// Initialise a semaphore in `region` with every permit available.
    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>, max_permits: u32) -> Result<Self> {
        if max_permits == 0 {
            return Err(SyncError::invalid_capacity("max_permits", max_permits));
        }
        let view = claim_view(region, offset, Self::WORDS)?;
        view.store(PERMITS, max_permits);
        view.store(WAITING, 0);
        view.store(MAX_OBSERVED, 0);
        view.store(MAX_PERMITS, max_permits);
        tracing::debug!(
            start = view.range().start,
            max_permits,
            "initialised semaphore"
        );
        Ok(Self {
            view,
            max_permits,
            config: WaitConfig::default(),
        })
    }

    /// Open a semaphore another party initialised at `offset`.
    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let view = attach_view(region, offset, Self::WORDS)?;
        let max_permits = view.load(MAX_PERMITS);
        if max_permits == 0 {
            return Err(SyncError::invalid_capacity("max_permits", max_permits));
        }
        let permits = view.load(PERMITS);
        if permits > max_permits {
            return Err(SyncError::LayoutMismatch {
                what: "semaphore permits",
                expected: max_permits as u64,
                found: permits as u64,
            });
        }
        Ok(Self {
            view,
            max_permits,
            config: WaitConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Take a permit if one is available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.view.load(PERMITS);
        loop {
            if current == 0 {
                return false;
            }
            match self.view.compare_exchange(PERMITS, current, current - 1) {
                Ok(_) => {
                    let in_use = self.max_permits - (current - 1);
                    self.view.fetch_max(MAX_OBSERVED, in_use);
                    return true;
                }
                Err(found) => current = found,
            }
        }
    }

    /// Take a permit, blocking until one is released if none is available.
    pub fn acquire(&self) {
        // No deadline, so this cannot time out.
        let _ = self.acquire_until(None);
    }

    /// Take a permit, giving up with [`SyncError::Timeout`] after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<()> {
        self.acquire_until(Some(timeout)).inspect_err(|e| {
            tracing::warn!(start = self.view.range().start, error = %e, "semaphore acquire timed out");
        })
    }

    fn acquire_until(&self, timeout: Option<Duration>) -> Result<()> {
        let mut waiter = Waiter::new(self.config, timeout);
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            waiter.pause(|budget| {
                self.view.fetch_add(WAITING, 1);
                let outcome = self.view.wait(PERMITS, 0, budget);
                self.view.fetch_sub(WAITING, 1);
                outcome
            })?;
        }
    }

    /// Return a permit and wake one parked acquirer.
    ///
    /// Releasing more permits than were taken is an invariant violation.
    pub fn release(&self) {
        let mut current = self.view.load(PERMITS);
        loop {
            if current >= self.max_permits {
                invariant_violation(InvariantViolation::SemaphoreOverflow {
                    permits: current,
                    max_permits: self.max_permits,
                });
            }
            match self.view.compare_exchange(PERMITS, current, current + 1) {
                Ok(_) => break,
                Err(found) => current = found,
            }
        }
        // `waiting` is diagnostic only, so wake unconditionally.
        self.view.wake_one(PERMITS);
    }

    /// Take a permit and return a guard that releases it on drop.
    pub fn permit(&self) -> Permit<'_> {
        self.acquire();
        Permit { sema: self }
    }

    /// Available permits right now.
    #[inline]
    pub fn current_permits(&self) -> u32 {
        self.view.load(PERMITS)
    }

    #[inline]
    pub fn max_permits(&self) -> u32 {
        self.max_permits
    }

    /// Workers parked in acquire right now.
    #[inline]
    pub fn waiting(&self) -> u32 {
        self.view.load(WAITING)
    }

    /// Most permits ever held at the same time.
    #[inline]
    pub fn max_observed(&self) -> u32 {
        self.view.load(MAX_OBSERVED)
    }

    pub fn stats(&self) -> SemaphoreStats {
        SemaphoreStats {
            permits: self.current_permits(),
            max_permits: self.max_permits,
            waiting: self.waiting(),
            max_observed: self.max_observed(),
        }
    }
}

/// A held permit, released on drop.
#[must_use = "dropping the permit releases it immediately"]
pub struct Permit<'a> {
    sema: &'a CountingSemaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sema.release();
    }
}
