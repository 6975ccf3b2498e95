//! The shared word region.
//!
//! A [`SharedRegion`] is a fixed-length array of 32-bit atomic words. It is
//! the only channel between workers: every primitive in this crate is a
//! [`RegionView`] over a disjoint [`WordRange`] of some region, and all of
//! its state lives in those words.
//!
//! Ranges are handed out through [`SharedRegion::claim`] or
//! [`SharedRegion::reserve`], which refuse to overlap an earlier claim. That
//! keeps two primitives from ever sharing a control word.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::futex::{WaitOutcome, futex_wait, futex_wake_all, futex_wake_one};
use crate::sync::{Arc, AtomicU32, Ordering};

/// A half-open range of word indices `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordRange {
    pub start: usize,
    pub len: usize,
}

impl WordRange {
    #[inline]
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    #[inline]
    pub const fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub const fn overlaps(&self, other: &WordRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Absolute index of the `i`th word of this range.
    #[inline]
    pub fn word(&self, i: usize) -> usize {
        debug_assert!(i < self.len, "word {} outside range of {}", i, self.len);
        self.start + i
    }
}

/// Errors from carving word ranges out of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// A region must hold at least one word.
    Empty,
    /// The requested range does not fit in the region.
    OutOfBounds {
        offset: usize,
        len: usize,
        region_len: usize,
    },
    /// The requested range overlaps a range already claimed.
    Overlap {
        requested: WordRange,
        existing: WordRange,
    },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "region must hold at least one word"),
            Self::OutOfBounds {
                offset,
                len,
                region_len,
            } => write!(
                f,
                "range {}..{} outside region of {} words",
                offset,
                offset + len,
                region_len
            ),
            Self::Overlap {
                requested,
                existing,
            } => write!(
                f,
                "range {}..{} overlaps claimed range {}..{}",
                requested.start,
                requested.end(),
                existing.start,
                existing.end()
            ),
        }
    }
}

impl std::error::Error for RegionError {}

/// A fixed-size block of atomic words shared by every worker of a run.
pub struct SharedRegion {
    words: Box<[AtomicU32]>,
    claims: Mutex<Vec<WordRange>>,
}

impl SharedRegion {
    /// Allocate a zeroed region of `len` words.
    pub fn new(len: usize) -> Result<Arc<Self>, RegionError> {
        if len == 0 {
            return Err(RegionError::Empty);
        }
        let words = (0..len).map(|_| AtomicU32::new(0)).collect();
        tracing::debug!(words = len, "allocated shared region");
        Ok(Arc::new(Self {
            words,
            claims: Mutex::new(Vec::new()),
        }))
    }

    /// Number of words in the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Claim `[offset, offset + len)` for one primitive.
    pub fn claim(&self, offset: usize, len: usize) -> Result<WordRange, RegionError> {
        let requested = WordRange::new(offset, len);
        if len == 0 || requested.end() > self.len() {
            return Err(RegionError::OutOfBounds {
                offset,
                len,
                region_len: self.len(),
            });
        }

        let mut claims = self.claims.lock();
        if let Some(existing) = claims.iter().find(|c| c.overlaps(&requested)) {
            return Err(RegionError::Overlap {
                requested,
                existing: *existing,
            });
        }
        claims.push(requested);
        Ok(requested)
    }

    /// Claim the next `len` words after every existing claim.
    pub fn reserve(&self, len: usize) -> Result<WordRange, RegionError> {
        let start = self
            .claims
            .lock()
            .iter()
            .map(WordRange::end)
            .max()
            .unwrap_or(0);
        self.claim(start, len)
    }

    /// Ranges claimed so far, in claim order.
    pub fn claimed(&self) -> Vec<WordRange> {
        self.claims.lock().clone()
    }

    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::SeqCst)
    }

    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::SeqCst)
    }

    #[inline]
    pub fn swap(&self, index: usize, value: u32) -> u32 {
        self.words[index].swap(value, Ordering::SeqCst)
    }

    /// Replace `current` with `new`. `Err` carries the value actually found.
    #[inline]
    pub fn compare_exchange(&self, index: usize, current: u32, new: u32) -> Result<u32, u32> {
        self.words[index].compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    #[inline]
    pub fn fetch_add(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_add(value, Ordering::SeqCst)
    }

    #[inline]
    pub fn fetch_sub(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_sub(value, Ordering::SeqCst)
    }

    #[inline]
    pub fn fetch_max(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_max(value, Ordering::SeqCst)
    }

    /// Block while word `index` equals `expected`.
    #[inline]
    pub fn wait(&self, index: usize, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        futex_wait(&self.words[index], expected, timeout)
    }

    #[inline]
    pub fn wake_one(&self, index: usize) -> usize {
        futex_wake_one(&self.words[index])
    }

    #[inline]
    pub fn wake_all(&self, index: usize) -> usize {
        futex_wake_all(&self.words[index])
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("len", &self.len())
            .field("claims", &*self.claims.lock())
            .finish()
    }
}

/// A primitive's window onto its own words of a region.
///
/// Word indices passed to a view are relative to the start of its range.
#[derive(Clone)]
pub struct RegionView {
    region: Arc<SharedRegion>,
    range: WordRange,
}

impl RegionView {
    pub(crate) fn new(region: Arc<SharedRegion>, range: WordRange) -> Self {
        Self { region, range }
    }

    /// The region this view belongs to.
    #[inline]
    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    #[inline]
    pub fn range(&self) -> WordRange {
        self.range
    }

    /// Narrow this view to `len` words starting at relative word `offset`.
    pub(crate) fn sub(&self, offset: usize, len: usize) -> RegionView {
        debug_assert!(offset + len <= self.range.len);
        RegionView {
            region: self.region.clone(),
            range: WordRange::new(self.range.start + offset, len),
        }
    }

    #[inline]
    pub fn load(&self, i: usize) -> u32 {
        self.region.load(self.range.word(i))
    }

    #[inline]
    pub fn store(&self, i: usize, value: u32) {
        self.region.store(self.range.word(i), value)
    }

    #[inline]
    pub fn swap(&self, i: usize, value: u32) -> u32 {
        self.region.swap(self.range.word(i), value)
    }

    #[inline]
    pub fn compare_exchange(&self, i: usize, current: u32, new: u32) -> Result<u32, u32> {
        self.region.compare_exchange(self.range.word(i), current, new)
    }

    #[inline]
    pub fn fetch_add(&self, i: usize, value: u32) -> u32 {
        self.region.fetch_add(self.range.word(i), value)
    }

    #[inline]
    pub fn fetch_sub(&self, i: usize, value: u32) -> u32 {
        self.region.fetch_sub(self.range.word(i), value)
    }

    #[inline]
    pub fn fetch_max(&self, i: usize, value: u32) -> u32 {
        self.region.fetch_max(self.range.word(i), value)
    }

    #[inline]
    pub fn wait(&self, i: usize, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        self.region.wait(self.range.word(i), expected, timeout)
    }

    #[inline]
    pub fn wake_one(&self, i: usize) -> usize {
        self.region.wake_one(self.range.word(i))
    }

    #[inline]
    pub fn wake_all(&self, i: usize) -> usize {
        self.region.wake_all(self.range.word(i))
    }
}

impl fmt::Debug for RegionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionView")
            .field("start", &self.range.start)
            .field("len", &self.range.len)
            .finish()
    }
}

/// Claim `len` words at `offset` when given, otherwise after existing claims.
pub(crate) fn claim_view(
    region: &Arc<SharedRegion>,
    offset: Option<usize>,
    len: usize,
) -> Result<RegionView, RegionError> {
    let range = match offset {
        Some(offset) => region.claim(offset, len)?,
        None => region.reserve(len)?,
    };
    Ok(RegionView::new(region.clone(), range))
}

/// View an already-initialised range without claiming it again.
pub(crate) fn attach_view(
    region: &Arc<SharedRegion>,
    offset: usize,
    len: usize,
) -> Result<RegionView, RegionError> {
    if len == 0 || offset + len > region.len() {
        return Err(RegionError::OutOfBounds {
            offset,
            len,
            region_len: region.len(),
        });
    }
    Ok(RegionView::new(region.clone(), WordRange::new(offset, len)))
}
