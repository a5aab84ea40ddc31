//! Card address encoding
//!
//! The card does not take a plain big-endian address. A byte address is
//! split into a 7-bit high part, an 8-bit sector part, a 2-bit part and a
//! 7-bit offset:
//!
//! ```text
//! byte 0: (addr >> 17) & 0x7f
//! byte 1: (addr >>  9) & 0xff
//! byte 2: (addr >>  7) & 0x03
//! byte 3:  addr        & 0x7f
//! ```
//!
//! Sector erase only sends the first two bytes.

/// Address width for card commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressWidth {
    /// No address phase
    #[default]
    None,
    /// 2 bytes, sector granularity (erase)
    Sector,
    /// 4 bytes, byte granularity (read, program)
    Page,
}

impl AddressWidth {
    /// Returns the number of address bytes
    pub const fn bytes(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Sector => 2,
            Self::Page => 4,
        }
    }

    /// Encode an address into bytes
    pub fn encode(&self, address: u32, buf: &mut [u8]) {
        let full = encode(address);
        let len = self.bytes();
        buf[..len].copy_from_slice(&full[..len]);
    }
}

/// Encode a byte address into the card's 4-byte address format
pub const fn encode(address: u32) -> [u8; 4] {
    [
        ((address >> 17) & 0x7f) as u8,
        ((address >> 9) & 0xff) as u8,
        ((address >> 7) & 0x03) as u8,
        (address & 0x7f) as u8,
    ]
}

/// Decode the card's 4-byte address format back into a byte address
pub const fn decode(bytes: [u8; 4]) -> u32 {
    ((bytes[0] as u32 & 0x7f) << 17)
        | ((bytes[1] as u32) << 9)
        | ((bytes[2] as u32 & 0x03) << 7)
        | (bytes[3] as u32 & 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_page_aligned() {
        assert_eq!(encode(0), [0, 0, 0, 0]);
        assert_eq!(encode(0x80), [0, 0, 1, 0]);
        assert_eq!(encode(0x2000), [0, 0x10, 0, 0]);
        assert_eq!(encode(0x20000), [1, 0, 0, 0]);
    }

    #[test]
    fn test_encode_keeps_low_bits() {
        assert_eq!(encode(0x7f), [0, 0, 0, 0x7f]);
        assert_eq!(encode(0x1ff), [0, 0, 3, 0x7f]);
    }

    #[test]
    fn test_sector_width_truncates() {
        let mut buf = [0xAAu8; 4];
        AddressWidth::Sector.encode(0x3e000, &mut buf);
        assert_eq!(buf, [0x01, 0xF0, 0xAA, 0xAA]);
    }

    #[test]
    fn test_decode_inverts_encode() {
        for addr in [0, 0x7f, 0x80, 0x1ff, 0x2000, 0x7_FEC8, 0x1F_FF80] {
            assert_eq!(decode(encode(addr)), addr);
        }
    }
}
