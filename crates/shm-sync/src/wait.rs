//! Spin-then-block waiting, shared by every blocking primitive.
//!
//! A blocked operation moves through three phases:
//!
//! ```text
//!   Spinning ──(spin_limit exhausted)──> Blocked ──(woken / slice over)──> Retrying
//!                                           ^                                 │
//!                                           └──────(attempt failed again)─────┘
//! ```
//!
//! The primitive owns the attempt itself; [`Waiter`] only decides whether the
//! next pause is a spin or a park, and when a bounded wait has run out.

use std::time::{Duration, Instant};

use crate::error::SyncError;
use crate::futex::WaitOutcome;
use crate::sync::spin_loop;

/// Tuning for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Failed attempts to absorb by spinning before the first park.
    pub spin_limit: u32,
    /// Upper bound on a single park. A parked worker re-checks its condition
    /// at least this often even if no wake arrives. `None` parks until woken.
    pub park_slice: Option<Duration>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            spin_limit: 64,
            park_slice: Some(Duration::from_millis(100)),
        }
    }
}

impl WaitConfig {
    /// Never spin; park straight away.
    pub const fn no_spin() -> Self {
        Self {
            spin_limit: 0,
            park_slice: Some(Duration::from_millis(100)),
        }
    }
}

/// Where a [`Waiter`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitPhase {
    Spinning,
    Blocked,
    Retrying,
}

pub(crate) struct Waiter {
    config: WaitConfig,
    spins: u32,
    phase: WaitPhase,
    started: Instant,
    deadline: Option<Instant>,
}

impl Waiter {
    /// A timeout too large to represent as an `Instant` means no deadline.
    pub(crate) fn new(config: WaitConfig, timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            config,
            spins: 0,
            phase: WaitPhase::Spinning,
            started,
            deadline: timeout.and_then(|t| started.checked_add(t)),
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> WaitPhase {
        self.phase
    }

    /// Time spent waiting so far.
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Park budget left before the deadline, or `Err(Timeout)` once it passed.
    pub(crate) fn remaining(&self) -> Result<Option<Duration>, SyncError> {
        let Some(deadline) = self.deadline else {
            return Ok(self.config.park_slice);
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(SyncError::Timeout {
                waited: self.elapsed(),
            });
        }
        let left = deadline - now;
        Ok(Some(match self.config.park_slice {
            Some(slice) => slice.min(left),
            None => left,
        }))
    }

    /// Pause after a failed attempt.
    ///
    /// Spins while the spin budget lasts. After that, calls `block` with the
    /// park budget; `block` is expected to register itself as a waiter, sleep
    /// on the relevant word, and deregister.
    pub(crate) fn pause(
        &mut self,
        block: impl FnOnce(Option<Duration>) -> WaitOutcome,
    ) -> Result<(), SyncError> {
        if self.phase == WaitPhase::Spinning && self.spins < self.config.spin_limit {
            self.spins += 1;
            spin_loop();
            return Ok(());
        }

        let budget = self.remaining()?;
        self.phase = WaitPhase::Blocked;
        let outcome = block(budget);
        tracing::trace!(?outcome, "parked wait returned");
        self.phase = WaitPhase::Retrying;
        Ok(())
    }
}
