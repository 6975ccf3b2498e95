//! Per-thread worker tokens.
//!
//! A lock records its holder as a token in the region so that a release from
//! the wrong worker can be caught. Tokens are non-zero (0 means "no owner"),
//! never reused within a process, and cheap to fetch after the first call.

/// Token meaning "nobody".
pub const NO_WORKER: u32 = 0;

/// The calling thread's worker token.
#[inline]
pub fn worker_token() -> u32 {
    #[cfg(not(feature = "loom"))]
    static NEXT: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);

    #[cfg(feature = "loom")]
    loom::lazy_static! {
        static ref NEXT: loom::sync::atomic::AtomicU32 = loom::sync::atomic::AtomicU32::new(1);
    }

    #[cfg(not(feature = "loom"))]
    std::thread_local! {
        static TOKEN: u32 = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    #[cfg(feature = "loom")]
    loom::thread_local! {
        static TOKEN: u32 = NEXT.fetch_add(1, loom::sync::atomic::Ordering::Relaxed);
    }

    TOKEN.with(|t| *t)
}
