//! Bit-cursor routing of content items between a chain and its children.
//!
//! Every content item carries two fixed-length routing fingerprints. At a
//! given cursor position the bit of each fingerprint is read; agreement on
//! `0` routes LEFT, agreement on `1` routes RIGHT, and disagreement leaves the
//! item in the splitting chain (CENTER). Each split generation gets its own
//! cursor one bit deeper, so children partition on fresh bits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Width of a routing fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Total number of routable bit positions.
pub const MAX_MASK_BITS: usize = FINGERPRINT_LEN * 8;

/// Fixed-length routing fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Derive a fingerprint from arbitrary bytes.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Read the bit at `(byte, bit)`, where bit 0 is the high bit.
    #[must_use]
    const fn bit(&self, byte: usize, bit: u8) -> bool {
        self.0[byte] & (0x80 >> bit) != 0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Routing outcome for one content item at one cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    Left,
    Right,
    /// Fingerprints disagree at this depth; the item stays with the parent.
    Center,
}

/// Position of the routing bit: a byte index plus a bit offset (high to low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaskCursor {
    byte: usize,
    bit: u8,
}

impl MaskCursor {
    /// Cursor at the highest bit of the first byte.
    #[must_use]
    pub const fn new() -> Self {
        Self { byte: 0, bit: 0 }
    }

    /// Cursor positioned `depth` bits from the start.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::MaskExhausted`] if `depth` is past the last bit.
    pub fn at_depth(depth: usize) -> Result<Self, LedgerError> {
        if depth >= MAX_MASK_BITS {
            return Err(LedgerError::MaskExhausted { depth });
        }
        Ok(Self {
            byte: depth / 8,
            bit: u8::try_from(depth % 8).unwrap_or(0),
        })
    }

    /// Number of bits consumed before this position.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.byte * 8 + self.bit as usize
    }

    #[must_use]
    pub const fn byte_index(&self) -> usize {
        self.byte
    }

    #[must_use]
    pub const fn bit_offset(&self) -> u8 {
        self.bit
    }

    /// Classify an item by its two fingerprints at the current position.
    #[must_use]
    pub const fn match_ids(&self, first: &Fingerprint, second: &Fingerprint) -> Route {
        match (first.bit(self.byte, self.bit), second.bit(self.byte, self.bit)) {
            (false, false) => Route::Left,
            (true, true) => Route::Right,
            _ => Route::Center,
        }
    }

    /// Move one bit deeper: high to low within a byte, then the next byte.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::MaskExhausted`] when already on the last bit;
    /// the cursor is left unchanged.
    pub fn advance(&mut self) -> Result<(), LedgerError> {
        if self.depth() + 1 >= MAX_MASK_BITS {
            return Err(LedgerError::MaskExhausted {
                depth: self.depth(),
            });
        }
        if self.bit == 7 {
            self.bit = 0;
            self.byte += 1;
        } else {
            self.bit += 1;
        }
        Ok(())
    }

    /// A fresh cursor one bit deeper, leaving `self` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::MaskExhausted`] when already on the last bit.
    pub fn deeper(&self) -> Result<Self, LedgerError> {
        let mut next = *self;
        next.advance()?;
        Ok(next)
    }
}

impl Default for MaskCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(first: u8) -> Fingerprint {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes[0] = first;
        Fingerprint(bytes)
    }

    #[test]
    fn agreeing_zero_bits_route_left() {
        let cursor = MaskCursor::new();
        assert_eq!(cursor.match_ids(&fp(0b0111_1111), &fp(0b0000_0000)), Route::Left);
    }

    #[test]
    fn agreeing_one_bits_route_right() {
        let cursor = MaskCursor::new();
        assert_eq!(cursor.match_ids(&fp(0b1000_0000), &fp(0b1111_1111)), Route::Right);
    }

    #[test]
    fn disagreeing_bits_stay_center() {
        let cursor = MaskCursor::new();
        assert_eq!(cursor.match_ids(&fp(0b1000_0000), &fp(0b0000_0000)), Route::Center);
    }

    #[test]
    fn advance_walks_high_to_low_then_next_byte() {
        let mut cursor = MaskCursor::new();
        for expected in 1..=8 {
            cursor.advance().unwrap();
            assert_eq!(cursor.depth(), expected);
        }
        assert_eq!(cursor.byte_index(), 1);
        assert_eq!(cursor.bit_offset(), 0);
    }

    #[test]
    fn second_bit_is_read_after_one_advance() {
        let cursor = MaskCursor::new().deeper().unwrap();
        assert_eq!(cursor.match_ids(&fp(0b0100_0000), &fp(0b1100_0000)), Route::Right);
        assert_eq!(cursor.match_ids(&fp(0b1000_0000), &fp(0b0000_0000)), Route::Left);
    }

    #[test]
    fn deeper_leaves_original_untouched() {
        let root = MaskCursor::new();
        let child = root.deeper().unwrap();
        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn advance_stops_at_last_bit() {
        let mut cursor = MaskCursor::at_depth(MAX_MASK_BITS - 1).unwrap();
        let err = cursor.advance().unwrap_err();
        assert!(matches!(err, LedgerError::MaskExhausted { .. }));
        assert_eq!(cursor.depth(), MAX_MASK_BITS - 1);
        assert!(MaskCursor::at_depth(MAX_MASK_BITS).is_err());
    }

    #[test]
    fn at_depth_matches_repeated_advance() {
        let mut walked = MaskCursor::new();
        for _ in 0..19 {
            walked.advance().unwrap();
        }
        assert_eq!(walked, MaskCursor::at_depth(19).unwrap());
    }
}
