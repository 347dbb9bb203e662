//! Chunk Acknowledgement Window
//!
//! The receiver tracks received chunks as a contiguous base (the first chunk
//! still missing) plus a 32-bit lookahead mask: bit `i` is set when chunk
//! `base + 1 + i` arrived out of order. Everything below the base has been
//! received. The sender mirrors the last reported window to decide which
//! chunks still need sending.

/// Lookahead slots beyond the base
pub const WINDOW_BITS: u32 = 32;

/// Result of offering a chunk to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// The base chunk arrived; the base moved forward by `slid` chunks
    Advanced { slid: u32 },
    /// A chunk beyond the base arrived and was recorded in the mask
    Buffered,
    /// Already received
    Duplicate,
    /// Below the base or past the lookahead
    OutOfWindow,
}

impl Accept {
    /// True when the chunk is new and its data should be stored
    pub fn is_new(self) -> bool {
        matches!(self, Accept::Advanced { .. } | Accept::Buffered)
    }
}

/// Receiver-side window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkWindow {
    base: u32,
    mask: u32,
}

impl ChunkWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(base: u32, mask: u32) -> Self {
        ChunkWindow { base, mask }
    }

    /// First chunk not yet received
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Highest chunk index the window can record
    pub fn last_slot(&self) -> u64 {
        self.base as u64 + WINDOW_BITS as u64
    }

    /// True if chunk `index` has been received
    pub fn contains(&self, index: u32) -> bool {
        if index < self.base {
            return true;
        }
        match index - self.base {
            0 => false,
            offset if offset <= WINDOW_BITS => self.mask & (1 << (offset - 1)) != 0,
            _ => false,
        }
    }

    /// Record chunk `index`
    pub fn accept(&mut self, index: u32) -> Accept {
        if index < self.base || index as u64 > self.last_slot() {
            return Accept::OutOfWindow;
        }
        if index == self.base {
            let mut slid = 0;
            loop {
                self.base = self.base.wrapping_add(1);
                slid += 1;
                let next_present = self.mask & 1 != 0;
                self.mask >>= 1;
                if !next_present {
                    break;
                }
            }
            return Accept::Advanced { slid };
        }

        let bit = 1u32 << (index - self.base - 1);
        if self.mask & bit != 0 {
            Accept::Duplicate
        } else {
            self.mask |= bit;
            Accept::Buffered
        }
    }

    /// Chunks received in `next` that were not received in `self`
    ///
    /// A report whose base lies behind this one is stale and counts nothing.
    pub fn newly_acked(&self, next: &ChunkWindow) -> u32 {
        if next.base < self.base {
            return 0;
        }
        let d = next.base - self.base;

        // chunks in [self.base, next.base) are all received now
        let below = if d > 0 {
            let span = (d - 1).min(WINDOW_BITS);
            d - (self.mask & low_bits(span)).count_ones()
        } else {
            0
        };

        // chunks past next.base the old mask did not have
        let old_shifted = if d >= WINDOW_BITS { 0 } else { self.mask >> d };
        let above = (next.mask & !old_shifted).count_ones();

        below + above
    }
}

fn low_bits(n: u32) -> u32 {
    if n >= WINDOW_BITS {
        u32::MAX
    } else {
        (1u32 << n) - 1
    }
}

/// Sender-side view of the window
///
/// Bit 0 of `sent` stands for the base chunk, bit `i` for chunk `base + i`.
/// A set bit means the chunk is received or was sent since the last report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendWindow {
    base: u32,
    sent: u64,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Adopt a receiver report; unreceived chunks become eligible again
    pub fn update(&mut self, report: &ChunkWindow) {
        self.base = report.base();
        self.sent = (report.mask() as u64) << 1;
    }

    /// Next chunk to send, limited to indices below `chunk_count`
    pub fn next_unsent(&self, chunk_count: u64) -> Option<u32> {
        (0..=WINDOW_BITS)
            .find(|&i| self.sent & (1u64 << i) == 0)
            .map(|i| self.base as u64 + i as u64)
            .filter(|&index| index < chunk_count)
            .map(|index| index as u32)
    }

    pub fn mark_sent(&mut self, index: u32) {
        if index >= self.base && index - self.base <= WINDOW_BITS {
            self.sent |= 1u64 << (index - self.base);
        }
    }
}
