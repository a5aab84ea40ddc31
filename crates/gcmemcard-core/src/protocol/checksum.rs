//! Block integrity checksums
//!
//! The word sum is the one the card's own header uses: the payload is read
//! as big-endian 16-bit words and summed. The header stores a second value,
//! the sum of the one's complement of every word, and maps `0xFFFF` to zero
//! in both.

/// Checksum algorithm used to validate block payloads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// XOR of all payload bytes (1 byte)
    Xor8,
    /// Sum of big-endian 16-bit words, truncated to 16 bits (2 bytes)
    Sum16,
}

impl Checksum {
    /// Number of checksum bytes on the wire
    pub const fn width(&self) -> usize {
        match self {
            Self::Xor8 => 1,
            Self::Sum16 => 2,
        }
    }

    /// Compute the checksum of `data`
    pub fn compute(&self, data: &[u8]) -> u16 {
        match self {
            Self::Xor8 => data.iter().fold(0u8, |acc, b| acc ^ b) as u16,
            Self::Sum16 => word_sum(data) as u16,
        }
    }

    /// Write `value` into `buf` in wire order (big-endian)
    pub fn encode(&self, value: u16, buf: &mut [u8]) {
        match self {
            Self::Xor8 => buf[0] = value as u8,
            Self::Sum16 => buf[..2].copy_from_slice(&value.to_be_bytes()),
        }
    }

    /// Read a checksum value from `buf` in wire order
    pub fn decode(&self, buf: &[u8]) -> u16 {
        match self {
            Self::Xor8 => buf[0] as u16,
            Self::Sum16 => u16::from_be_bytes([buf[0], buf[1]]),
        }
    }

    /// Returns true if `expected` (as received) matches `data`
    pub fn verify(&self, data: &[u8], expected: &[u8]) -> bool {
        self.compute(data) == self.decode(expected)
    }
}

/// Integrity scheme of a device generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Integrity {
    /// The device appends a checksum to every page it sends and expects
    /// one after every page it is sent
    Trailing(Checksum),
    /// The device sends no checksum; each page is read twice and both
    /// reads must be byte-identical
    Reread,
}

impl Integrity {
    /// The checksum carried on the wire, if any
    pub const fn checksum(&self) -> Option<Checksum> {
        match self {
            Self::Trailing(c) => Some(*c),
            Self::Reread => None,
        }
    }

    /// Bytes appended to each page on the wire
    pub const fn trailer_len(&self) -> usize {
        match self {
            Self::Trailing(c) => c.width(),
            Self::Reread => 0,
        }
    }
}

/// Sum of big-endian 16-bit words (no truncation)
fn word_sum(data: &[u8]) -> u32 {
    data.chunks(2)
        .map(|w| {
            let hi = w[0] as u32;
            let lo = w.get(1).copied().unwrap_or(0) as u32;
            (hi << 8) | lo
        })
        .fold(0u32, |acc, w| acc.wrapping_add(w))
}

/// Compute the two card header checksums over `data`
///
/// `data` must have an even length. Returns `(checksum1, checksum2)`.
pub fn header_checksums(data: &[u8]) -> (u16, u16) {
    let total = word_sum(data);
    let words = (data.len() / 2) as u32;
    let sum = (total & 0xFFFF) as u16;
    let inv = (total.wrapping_add(words)).wrapping_neg() as u16;
    let fix = |v: u16| if v == 0xFFFF { 0 } else { v };
    (fix(sum), fix(inv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor8() {
        assert_eq!(Checksum::Xor8.compute(&[0x0F, 0xF0, 0x01]), 0xFE);
        assert_eq!(Checksum::Xor8.compute(&[]), 0);
    }

    #[test]
    fn test_sum16_wraps() {
        assert_eq!(Checksum::Sum16.compute(&[0x12, 0x34, 0x00, 0x01]), 0x1235);
        assert_eq!(Checksum::Sum16.compute(&[0xFF, 0xFF, 0x00, 0x02]), 0x0001);
    }

    #[test]
    fn test_encode_decode_sum16() {
        let mut buf = [0u8; 2];
        Checksum::Sum16.encode(0xBEEF, &mut buf);
        assert_eq!(buf, [0xBE, 0xEF]);
        assert!(Checksum::Sum16.verify(&[0xBE, 0xEF], &buf));
    }

    #[test]
    fn test_header_checksums_of_erased_data() {
        // 4 words of 0xFFFF: sum = 0x3FFFC, inverted = -(0x3FFFC + 4) = 0xFFFC0000
        let (c1, c2) = header_checksums(&[0xFF; 8]);
        assert_eq!(c1, 0xFFFC);
        assert_eq!(c2, 0x0000);
    }

    #[test]
    fn test_header_checksums_map_ffff_to_zero() {
        let (c1, _) = header_checksums(&[0xFF, 0xFF]);
        assert_eq!(c1, 0);
    }

    #[test]
    fn test_trailer_len() {
        assert_eq!(Integrity::Trailing(Checksum::Sum16).trailer_len(), 2);
        assert_eq!(Integrity::Reread.trailer_len(), 0);
    }
}
