//! Error taxonomy.
//!
//! Construction misuse and expired waits are ordinary [`SyncError`] values.
//! Backpressure from the ring queue is not an error at all (see
//! [`PushResult`](crate::PushResult)). Broken invariants are never returned:
//! they go through [`invariant_violation`], which does not return.

use std::fmt;
use std::time::Duration;

use crate::region::RegionError;

/// Result alias for fallible primitive operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Recoverable errors reported by the primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A capacity, permit count, or party count was zero or too large.
    InvalidCapacity { what: &'static str, value: u64 },
    /// A bounded wait expired before the operation could complete.
    Timeout { waited: Duration },
    /// The backing region rejected the requested word range.
    Region(RegionError),
    /// `attach` found control words that do not describe this primitive.
    LayoutMismatch {
        what: &'static str,
        expected: u64,
        found: u64,
    },
}

impl SyncError {
    pub(crate) fn invalid_capacity(what: &'static str, value: impl Into<u64>) -> Self {
        Self::InvalidCapacity {
            what,
            value: value.into(),
        }
    }

    /// Returns true for [`SyncError::Timeout`].
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { what, value } => {
                write!(f, "invalid {}: {}", what, value)
            }
            Self::Timeout { waited } => write!(f, "timed out after {:?}", waited),
            Self::Region(e) => write!(f, "region error: {}", e),
            Self::LayoutMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "layout mismatch for {}: expected {}, found {}",
                what, expected, found
            ),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Region(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegionError> for SyncError {
    fn from(e: RegionError) -> Self {
        Self::Region(e)
    }
}

/// A broken invariant. Reaching one means a caller or a primitive is buggy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// `release` would push permits past `max_permits`.
    SemaphoreOverflow { permits: u32, max_permits: u32 },
    /// A lock was released while it was not held.
    ReleaseUnlocked,
    /// A lock was released by a worker other than its holder.
    ReleaseByNonOwner { owner: u32, caller: u32 },
    /// A buffer's `count` left `[0, capacity]`.
    CountOutOfRange { count: u32, capacity: u32 },
    /// A ring queue's occupied length left `[0, capacity]`.
    CursorOutOfRange { len: i64, capacity: u32 },
    /// A read lock was released with no readers inside.
    ReaderUnderflow,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SemaphoreOverflow {
                permits,
                max_permits,
            } => write!(
                f,
                "semaphore overflow: release with {} of {} permits already available",
                permits, max_permits
            ),
            Self::ReleaseUnlocked => write!(f, "release of a lock that is not held"),
            Self::ReleaseByNonOwner { owner, caller } => write!(
                f,
                "lock held by worker {} released by worker {}",
                owner, caller
            ),
            Self::CountOutOfRange { count, capacity } => {
                write!(f, "buffer count {} outside [0, {}]", count, capacity)
            }
            Self::CursorOutOfRange { len, capacity } => {
                write!(f, "queue length {} outside [0, {}]", len, capacity)
            }
            Self::ReaderUnderflow => write!(f, "read unlock with no readers"),
        }
    }
}

/// Report a broken invariant and stop.
///
/// Debug builds panic so tests can observe the violation; release builds log
/// and abort the process.
#[cold]
#[track_caller]
pub fn invariant_violation(kind: InvariantViolation) -> ! {
    tracing::error!(violation = %kind, "invariant violation");
    if cfg!(debug_assertions) {
        panic!("invariant violation: {}", kind);
    }
    std::process::abort()
}
