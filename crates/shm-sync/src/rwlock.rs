//! Reader/writer lock on region words, preferring writers.
//!
//! Layout (2 words):
//!
//! ```text
//! [0] state            0 = free, n = n readers, u32::MAX = writer
//! [1] waiting_writers  writers queued for the lock
//! ```
//!
//! New readers hold back while `waiting_writers` is non-zero, so a steady
//! stream of readers cannot starve a writer. Readers held back that way park
//! on `waiting_writers`; readers blocked by an active writer park on `state`.

use std::marker::PhantomData;

use crate::error::{InvariantViolation, Result, invariant_violation};
use crate::futex::WaitOutcome;
use crate::region::{RegionView, SharedRegion, attach_view, claim_view};
use crate::sync::Arc;
use crate::wait::{WaitConfig, Waiter};

const STATE: usize = 0;
const WAITING_WRITERS: usize = 1;

const FREE: u32 = 0;
const WRITER: u32 = u32::MAX;
const MAX_READERS: u32 = WRITER - 1;

#[derive(Clone, Debug)]
pub struct ReaderWriterLock {
    view: RegionView,
    config: WaitConfig,
}

impl ReaderWriterLock {
    pub const WORDS: usize = 2;

    pub fn create() -> Result<Self> {
        let region = SharedRegion::new(Self::WORDS)?;
        Self::init(&region, Some(0))
    }

    pub fn init(region: &Arc<SharedRegion>, offset: Option<usize>) -> Result<Self> {
        let view = claim_view(region, offset, Self::WORDS)?;
        view.store(STATE, FREE);
        view.store(WAITING_WRITERS, 0);
        tracing::debug!(start = view.range().start, "initialised reader/writer lock");
        Ok(Self {
            view,
            config: WaitConfig::default(),
        })
    }

    pub fn attach(region: &Arc<SharedRegion>, offset: usize) -> Result<Self> {
        let view = attach_view(region, offset, Self::WORDS)?;
        Ok(Self {
            view,
            config: WaitConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Enter as a reader if no writer holds or is waiting for the lock.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        let mut state = self.view.load(STATE);
        loop {
            if state >= MAX_READERS || self.view.load(WAITING_WRITERS) > 0 {
                return None;
            }
            match self.view.compare_exchange(STATE, state, state + 1) {
                Ok(_) => {
                    return Some(ReadGuard {
                        lock: self,
                        _not_send: PhantomData,
                    });
                }
                Err(found) => state = found,
            }
        }
    }

    /// Enter as a reader, blocking while a writer holds or awaits the lock.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut waiter = Waiter::new(self.config, None);
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            // No deadline, so this cannot time out.
            let _ = waiter.pause(|budget| {
                let state = self.view.load(STATE);
                if state == WRITER {
                    return self.view.wait(STATE, WRITER, budget);
                }
                match self.view.load(WAITING_WRITERS) {
                    0 => WaitOutcome::Mismatch,
                    queued => self.view.wait(WAITING_WRITERS, queued, budget),
                }
            });
        }
    }

    /// Take exclusive access if the lock is entirely free.
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        self.view
            .compare_exchange(STATE, FREE, WRITER)
            .is_ok()
            .then_some(WriteGuard {
                lock: self,
                _not_send: PhantomData,
            })
    }

    /// Take exclusive access, blocking until every reader and writer leaves.
    pub fn write(&self) -> WriteGuard<'_> {
        if let Some(guard) = self.try_write() {
            return guard;
        }

        self.view.fetch_add(WAITING_WRITERS, 1);
        let mut waiter = Waiter::new(self.config, None);
        while self.view.compare_exchange(STATE, FREE, WRITER).is_err() {
            let _ = waiter.pause(|budget| match self.view.load(STATE) {
                FREE => WaitOutcome::Mismatch,
                held => self.view.wait(STATE, held, budget),
            });
        }
        if self.view.fetch_sub(WAITING_WRITERS, 1) == 1 {
            // Readers held back for writers may go once the writer is done.
            self.view.wake_all(WAITING_WRITERS);
        }

        WriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Leave as a reader. Normally called by [`ReadGuard`]'s drop.
    pub fn read_unlock(&self) {
        let mut state = self.view.load(STATE);
        loop {
            if state == FREE || state == WRITER {
                invariant_violation(InvariantViolation::ReaderUnderflow);
            }
            match self.view.compare_exchange(STATE, state, state - 1) {
                Ok(_) => break,
                Err(found) => state = found,
            }
        }
        if state == 1 && self.view.load(WAITING_WRITERS) > 0 {
            tracing::trace!(start = self.view.range().start, "last reader out, waking writers");
            self.view.wake_all(STATE);
        }
    }

    /// Leave as the writer. Normally called by [`WriteGuard`]'s drop.
    pub fn write_unlock(&self) {
        if self.view.compare_exchange(STATE, WRITER, FREE).is_err() {
            invariant_violation(InvariantViolation::ReleaseUnlocked);
        }
        self.view.wake_all(STATE);
    }

    /// Readers inside right now.
    #[inline]
    pub fn readers(&self) -> u32 {
        match self.view.load(STATE) {
            WRITER => 0,
            n => n,
        }
    }

    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.view.load(STATE) == WRITER
    }

    #[inline]
    pub fn waiting_writers(&self) -> u32 {
        self.view.load(WAITING_WRITERS)
    }
}

/// Shared access, released on drop.
#[must_use = "dropping the guard releases the read lock immediately"]
pub struct ReadGuard<'a> {
    lock: &'a ReaderWriterLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

/// Exclusive access, released on drop.
#[must_use = "dropping the guard releases the write lock immediately"]
pub struct WriteGuard<'a> {
    lock: &'a ReaderWriterLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_share_writer_excludes() {
        let lock = ReaderWriterLock::create().unwrap();
        let r1 = lock.read();
        let r2 = lock.try_read().unwrap();
        assert_eq!(lock.readers(), 2);
        assert!(lock.try_write().is_none());
        drop((r1, r2));

        let w = lock.write();
        assert!(lock.is_write_locked());
        assert_eq!(lock.readers(), 0);
        assert!(lock.try_read().is_none());
        drop(w);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn waiting_writer_holds_back_new_readers() {
        let lock = ReaderWriterLock::create().unwrap();
        let reader = lock.read();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _w = lock.write();
            })
        };
        while lock.waiting_writers() == 0 {
            thread::yield_now();
        }
        assert!(lock.try_read().is_none());

        drop(reader);
        writer.join().unwrap();
        assert_eq!(lock.waiting_writers(), 0);
        assert!(lock.try_read().is_some());
    }

    #[test]
    fn writers_serialise_updates() {
        let region = SharedRegion::new(ReaderWriterLock::WORDS + 1).unwrap();
        let lock = ReaderWriterLock::init(&region, Some(0)).unwrap();
        let counter = ReaderWriterLock::WORDS;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let (lock, region) = (lock.clone(), region.clone());
                thread::spawn(move || {
                    for _ in 0..500 {
                        if i % 2 == 0 {
                            let _w = lock.write();
                            let v = region.load(counter);
                            region.store(counter, v + 1);
                        } else {
                            let _r = lock.read();
                            assert!(!lock.is_write_locked());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(region.load(counter), 1_000);
    }

    #[test]
    #[should_panic(expected = "read unlock with no readers")]
    fn read_unlock_without_readers_is_fatal() {
        ReaderWriterLock::create().unwrap().read_unlock();
    }
}
