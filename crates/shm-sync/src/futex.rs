//! Block/wake on a single 32-bit word.
//!
//! A waiter sleeps only while the word still holds the value it expects; a
//! waker changes the word first and then wakes. Wakeups may be spurious, so
//! every caller re-checks its condition in a loop.
//!
//! On Linux this is the futex syscall. Other platforms use a small
//! address-keyed parking table. Under `loom` a wait is a yield.

use std::time::Duration;

use crate::sync::AtomicU32;

/// Why a [`futex_wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a waker, or spuriously.
    Woken,
    /// The word no longer held the expected value; nothing was slept.
    Mismatch,
    /// The timeout elapsed.
    TimedOut,
}

#[cfg(all(target_os = "linux", not(feature = "loom")))]
mod imp {
    use super::*;

    pub fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |t| t as *const libc::timespec);

        // SAFETY: `word` is a live, aligned u32 for the duration of the call.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ts_ptr,
            )
        };

        if ret == 0 {
            return WaitOutcome::Woken;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN) => WaitOutcome::Mismatch,
            Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
            // EINTR and anything else: let the caller re-check.
            _ => WaitOutcome::Woken,
        }
    }

    pub fn wake(word: &AtomicU32, count: i32) -> usize {
        // SAFETY: see `wait`.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
            )
        };
        if ret < 0 { 0 } else { ret as usize }
    }
}

#[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
mod imp {
    use super::*;
    use crate::sync::Ordering;
    use parking_lot::{Condvar, Mutex};

    const BUCKETS: usize = 64;

    struct Bucket {
        lock: Mutex<()>,
        cond: Condvar,
    }

    static TABLE: [Bucket; BUCKETS] = [const {
        Bucket {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }; BUCKETS];

    fn bucket(word: &AtomicU32) -> &'static Bucket {
        let addr = word as *const AtomicU32 as usize;
        &TABLE[(addr >> 2) % BUCKETS]
    }

    pub fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let bucket = bucket(word);
        let mut guard = bucket.lock.lock();
        if word.load(Ordering::SeqCst) != expected {
            return WaitOutcome::Mismatch;
        }
        match timeout {
            Some(d) => {
                if bucket.cond.wait_for(&mut guard, d).timed_out() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Woken
                }
            }
            None => {
                bucket.cond.wait(&mut guard);
                WaitOutcome::Woken
            }
        }
    }

    pub fn wake(word: &AtomicU32, _count: i32) -> usize {
        // Buckets are shared between addresses, so waking fewer than all
        // could hand the wake to a waiter on a different word.
        let bucket = bucket(word);
        let _guard = bucket.lock.lock();
        bucket.cond.notify_all()
    }
}

#[cfg(feature = "loom")]
mod imp {
    use super::*;
    use crate::sync::{Ordering, thread};

    pub fn wait(word: &AtomicU32, expected: u32, _timeout: Option<Duration>) -> WaitOutcome {
        if word.load(Ordering::SeqCst) != expected {
            return WaitOutcome::Mismatch;
        }
        thread::yield_now();
        WaitOutcome::Woken
    }

    pub fn wake(_word: &AtomicU32, _count: i32) -> usize {
        0
    }
}

/// Sleep while `word == expected`, for at most `timeout` if given.
#[inline]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    imp::wait(word, expected, timeout)
}

/// Wake at most one sleeper on `word`. Returns how many were woken, where known.
#[inline]
pub fn futex_wake_one(word: &AtomicU32) -> usize {
    imp::wake(word, 1)
}

/// Wake every sleeper on `word`.
#[inline]
pub fn futex_wake_all(word: &AtomicU32) -> usize {
    imp::wake(word, i32::MAX)
}
