//! Fixed-width records stored in region slots.
//!
//! Buffers and queues store items as a fixed number of words decided by the
//! item type, so slot arithmetic never depends on the value being stored.
//! Items are copied in and out word by word; nothing hands out a reference
//! into the region.

use crate::region::RegionView;

/// A value that occupies exactly `WORDS` region words.
pub trait Record: Copy + Send + 'static {
    /// Words per record. Must be at least 1.
    const WORDS: usize;

    /// Write `self` into `out`, which is exactly `WORDS` long.
    fn encode(&self, out: &mut [u32]);

    /// Rebuild a record from exactly `WORDS` words.
    fn decode(words: &[u32]) -> Self;
}

impl Record for u32 {
    const WORDS: usize = 1;

    #[inline]
    fn encode(&self, out: &mut [u32]) {
        out[0] = *self;
    }

    #[inline]
    fn decode(words: &[u32]) -> Self {
        words[0]
    }
}

/// The message record passed between producers and consumers.
///
/// `timestamp` and `payload` are opaque to this crate; producers usually put
/// a monotonic time and a sequence number in them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Message {
    pub timestamp: u64,
    pub producer: u32,
    pub payload: u32,
}

impl Message {
    pub const fn new(timestamp: u64, producer: u32, payload: u32) -> Self {
        Self {
            timestamp,
            producer,
            payload,
        }
    }
}

impl Record for Message {
    const WORDS: usize = 4;

    fn encode(&self, out: &mut [u32]) {
        out[0] = self.timestamp as u32;
        out[1] = (self.timestamp >> 32) as u32;
        out[2] = self.producer;
        out[3] = self.payload;
    }

    fn decode(words: &[u32]) -> Self {
        Self {
            timestamp: (words[0] as u64) | ((words[1] as u64) << 32),
            producer: words[2],
            payload: words[3],
        }
    }
}

/// Largest record this crate will stage on the stack.
pub(crate) const MAX_RECORD_WORDS: usize = 16;

/// Store `item` into `view` starting at relative word `at`.
pub(crate) fn write_record<T: Record>(view: &RegionView, at: usize, item: &T) {
    let mut scratch = [0u32; MAX_RECORD_WORDS];
    let words = &mut scratch[..T::WORDS];
    item.encode(words);
    for (i, w) in words.iter().enumerate() {
        view.store(at + i, *w);
    }
}

/// Load a record from `view` starting at relative word `at`.
pub(crate) fn read_record<T: Record>(view: &RegionView, at: usize) -> T {
    let mut scratch = [0u32; MAX_RECORD_WORDS];
    let words = &mut scratch[..T::WORDS];
    for (i, w) in words.iter_mut().enumerate() {
        *w = view.load(at + i);
    }
    T::decode(words)
}
