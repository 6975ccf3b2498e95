//! Reusable phase barrier.
//!
//! Layout (3 words):
//!
//! ```text
//! [0] arrived  parties waiting in the current phase
//! [1] phase    generation counter, wraps
//! [2] parties  fixed at init
//! ```
//!
//! The last party to arrive resets `arrived`, bumps `phase` and wakes
//! everyone parked on it.

use crate::error::{Result, SyncError};
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;
use crate::wait::{WaitConfig, Waiter};

const ARRIVED: usize = 0;
const PHASE: usize = 1;
const PARTIES: usize = 2;

/// What [`PhaseBarrier::wait`] reports to each party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// The phase that just completed.
    pub phase: u32,
    /// True for exactly one party per phase: the one that arrived last.
    pub is_leader: bool,
}

#[derive(Clone, Debug)]
pub struct PhaseBarrier {
    view: RegionView,
    parties: u32,
    config: WaitConfig,
}

impl PhaseBarrier {
    pub const WORDS: usize = 3;

    pub fn create(parties: u32) -> Result<Self> {
        if parties == 0 {
            return Err(SyncError::invalid_capacity("barrier parties", parties));
        }
        let region = SharedRegion::new(Self::WORDS)?;
        Self::init(&region, Some(0), parties)
    }

    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>, parties: u32) -> Result<Self> {
        if parties == 0 {
            return Err(SyncError::invalid_capacity("barrier parties", parties));
        }
        let view = claim_view(region, offset, Self::WORDS)?;
        view.store(ARRIVED, 0);
        view.store(PHASE, 0);
        view.store(PARTIES, parties);
        tracing::debug!(start = view.range().start, parties, "initialised barrier");
        Ok(Self {
            view,
            parties,
            config: WaitConfig::default(),
        })
    }

    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let view = attach_view(region, offset, Self::WORDS)?;
        let parties = view.load(PARTIES);
        if parties == 0 {
            return Err(SyncError::invalid_capacity("barrier parties", parties));
        }
        let arrived = view.load(ARRIVED);
        if arrived >= parties {
            return Err(SyncError::LayoutMismatch {
                what: "barrier arrivals",
                expected: parties as u64 - 1,
                found: arrived as u64,
            });
        }
        Ok(Self {
            view,
            parties,
            config: WaitConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Block until all parties have called `wait` for the current phase.
    pub fn wait(&self) -> BarrierWaitResult {
        // Cannot advance before this party arrives, so this is our phase.
        let phase = self.view.load(PHASE);
        let arrived = self.view.fetch_add(ARRIVED, 1) + 1;

        if arrived == self.parties {
            self.view.store(ARRIVED, 0);
            self.view.fetch_add(PHASE, 1);
            self.view.wake_all(PHASE);
            tracing::trace!(start = self.view.range().start, phase, "barrier phase complete");
            return BarrierWaitResult {
                phase,
                is_leader: true,
            };
        }

        let mut waiter = Waiter::new(self.config, None);
        while self.view.load(PHASE) == phase {
            // No deadline, so this cannot time out.
            let _ = waiter.pause(|budget| self.view.wait(PHASE, phase, budget));
        }
        BarrierWaitResult {
            phase,
            is_leader: false,
        }
    }

    #[inline]
    pub fn parties(&self) -> u32 {
        self.parties
    }

    /// Completed phases so far, modulo 2^32.
    #[inline]
    pub fn phase(&self) -> u32 {
        self.view.load(PHASE)
    }

    /// Parties currently waiting in this phase.
    #[inline]
    pub fn arrived(&self) -> u32 {
        self.view.load(ARRIVED)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn zero_parties_is_invalid() {
        assert!(matches!(
            PhaseBarrier::create(0),
            Err(SyncError::InvalidCapacity { what: "barrier parties", .. })
        ));
    }

    #[test]
    fn single_party_leads_every_phase() {
        let barrier = PhaseBarrier::create(1).unwrap();
        for phase in 0..3 {
            assert_eq!(
                barrier.wait(),
                BarrierWaitResult {
                    phase,
                    is_leader: true
                }
            );
        }
        assert_eq!(barrier.phase(), 3);
    }

    #[test]
    fn one_leader_per_phase_across_rounds() {
        let parties = 4;
        let rounds = 5;
        let barrier = PhaseBarrier::create(parties).unwrap();

        let handles: Vec<_> = (0..parties)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    (0..rounds)
                        .map(|round| {
                            let res = barrier.wait();
                            assert_eq!(res.phase, round);
                            res.is_leader as u32
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut leaders = vec![0; rounds as usize];
        for h in handles {
            for (round, led) in h.join().unwrap().into_iter().enumerate() {
                leaders[round] += led;
            }
        }
        assert!(leaders.iter().all(|&n| n == 1));
        assert_eq!(barrier.phase(), rounds);
        assert_eq!(barrier.arrived(), 0);
    }
}
