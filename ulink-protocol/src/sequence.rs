//! Link Sequence Numbers
//!
//! Frames carry a 4-bit sequence number. Synced frames and their acks use
//! the range 1..=15, wrapping from 15 back to 1; the value 0 is reserved for
//! unsynced frames and for "no sequence known yet".

use std::fmt;

/// Largest sequence number that fits the 4-bit header field
pub const MAX_SEQNO: u8 = 0x0F;

/// 4-bit link sequence number
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNo(u8);

impl SeqNo {
    /// Sequence number used by unsynced frames
    pub const NONE: SeqNo = SeqNo(0);

    /// First sequence number a fresh engine sends with
    pub const FIRST: SeqNo = SeqNo(1);

    /// Create a sequence number
    ///
    /// # Panics
    /// Panics if value exceeds MAX_SEQNO
    pub fn new(value: u8) -> Self {
        assert!(
            value <= MAX_SEQNO,
            "Sequence number {} exceeds maximum {}",
            value,
            MAX_SEQNO
        );
        SeqNo(value)
    }

    /// Create a sequence number from header bits, masking to 4 bits
    #[inline]
    pub fn from_bits(value: u8) -> Self {
        SeqNo(value & MAX_SEQNO)
    }

    /// Get the raw value
    #[inline]
    pub fn as_raw(self) -> u8 {
        self.0
    }

    /// True for the reserved zero value
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Get the next sequence number, skipping the reserved zero
    #[inline]
    pub fn next(self) -> Self {
        if self.0 >= MAX_SEQNO {
            SeqNo(1)
        } else {
            SeqNo(self.0 + 1)
        }
    }

    /// Advance to the next sequence number in place
    #[inline]
    pub fn increment(&mut self) {
        *self = self.next();
    }
}

impl fmt::Debug for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNo({:x})", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<SeqNo> for u8 {
    fn from(seq: SeqNo) -> u8 {
        seq.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wraps_to_one() {
        assert_eq!(SeqNo::new(14).next(), SeqNo::new(15));
        assert_eq!(SeqNo::new(15).next(), SeqNo::FIRST);
        assert_eq!(SeqNo::NONE.next(), SeqNo::FIRST);
    }

    #[test]
    fn test_full_cycle_never_hits_zero() {
        let mut seq = SeqNo::FIRST;
        for _ in 0..100 {
            seq.increment();
            assert!(!seq.is_none());
            assert!(seq.as_raw() <= MAX_SEQNO);
        }
    }

    #[test]
    fn test_from_bits_masks() {
        assert_eq!(SeqNo::from_bits(0x1F).as_raw(), 0x0F);
        assert_eq!(SeqNo::from_bits(0x10), SeqNo::NONE);
    }

    #[test]
    #[should_panic]
    fn test_new_rejects_wide_value() {
        let _ = SeqNo::new(16);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_next_stays_in_range(raw in 0u8..=15, steps in 0usize..64) {
                let mut seq = SeqNo::new(raw);
                for _ in 0..steps {
                    let prev = seq;
                    seq = seq.next();
                    prop_assert!((1..=MAX_SEQNO).contains(&seq.as_raw()));
                    if !prev.is_none() && prev.as_raw() < MAX_SEQNO {
                        prop_assert_eq!(seq.as_raw(), prev.as_raw() + 1);
                    }
                }
            }
        }
    }
}

