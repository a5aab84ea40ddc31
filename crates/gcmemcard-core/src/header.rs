//! Card header decoding
//!
//! The first 0x200 bytes of block 0 hold the filesystem header written by
//! the console when the card was formatted. All fields are big-endian:
//!
//! ```text
//! 0x000  serial[12]     card flash id, scrambled with a time-seeded key
//! 0x00C  time u64       console time base at format time
//! 0x014  bias u32
//! 0x018  lang u32
//! 0x01C  unknown u32
//! 0x020  device_id u16
//! 0x022  size u16       capacity in megabits
//! 0x024  encoding u16
//! 0x026  padding        0xFF
//! 0x1FC  checksum1 u16
//! 0x1FE  checksum2 u16
//! ```

use core::fmt;

use crate::protocol::checksum::header_checksums;
use crate::protocol::opcodes::READ_PAGE_SIZE;
use crate::protocol::unlock::FLASH_ID_LEN;

/// Offset of the first header checksum; everything before it is covered
const CHECKSUM_OFFSET: usize = 0x1FC;

/// Decoded card header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardHeader {
    /// Scrambled flash id
    pub serial: [u8; FLASH_ID_LEN],
    /// Format time (console time base)
    pub time: u64,
    /// Console clock bias
    pub bias: u32,
    /// Console language
    pub lang: u32,
    /// Device id of the formatting console slot
    pub device_id: u16,
    /// Capacity in megabits
    pub size_megabits: u16,
    /// Filename encoding (0 = ANSI, 1 = Shift-JIS)
    pub encoding: u16,
    /// Stored checksums
    pub checksums: (u16, u16),
    /// Checksums recomputed from the header contents
    pub computed_checksums: (u16, u16),
}

fn be16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

fn be32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn be64(b: &[u8], off: usize) -> u64 {
    (be32(b, off) as u64) << 32 | be32(b, off + 4) as u64
}

impl CardHeader {
    /// Decode the header from the first page of the card
    pub fn parse(page: &[u8; READ_PAGE_SIZE]) -> Self {
        let mut serial = [0u8; FLASH_ID_LEN];
        serial.copy_from_slice(&page[..FLASH_ID_LEN]);
        Self {
            serial,
            time: be64(page, 0x0C),
            bias: be32(page, 0x14),
            lang: be32(page, 0x18),
            device_id: be16(page, 0x20),
            size_megabits: be16(page, 0x22),
            encoding: be16(page, 0x24),
            checksums: (be16(page, CHECKSUM_OFFSET), be16(page, CHECKSUM_OFFSET + 2)),
            computed_checksums: header_checksums(&page[..CHECKSUM_OFFSET]),
        }
    }

    /// Whether the stored checksums match the header contents
    pub fn checksums_valid(&self) -> bool {
        self.checksums == self.computed_checksums
    }

    /// Unscramble the serial into the flash id it was made from
    pub fn decoded_serial(&self) -> [u8; FLASH_ID_LEN] {
        let mut out = self.serial;
        for (byte, key) in out.iter_mut().zip(serial_keys(self.time)) {
            *byte = byte.wrapping_sub(key);
        }
        out
    }

    /// Whether the header was written for the card with `flash_id`
    pub fn matches_flash_id(&self, flash_id: &[u8; FLASH_ID_LEN]) -> bool {
        self.decoded_serial() == *flash_id
    }
}

/// Serial scrambling key, one byte per serial byte
///
/// Linear congruential generator seeded with the format time. Only the low
/// bits of each step matter, so wrapping arithmetic gives the same bytes as
/// the unbounded computation.
fn serial_keys(time: u64) -> [u8; FLASH_ID_LEN] {
    let step = |k: u64| k.wrapping_mul(0x41C6_4E6D).wrapping_add(0x3039) >> 16;
    let mut keys = [0u8; FLASH_ID_LEN];
    let mut k = time;
    for key in keys.iter_mut() {
        k = step(k);
        *key = k as u8;
        k = step(k) & 0x7FFF;
    }
    keys
}

impl fmt::Display for CardHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial:    ")?;
        for b in self.serial {
            write!(f, "{:02x}", b)?;
        }
        write!(f, " (decoded: ")?;
        for b in self.decoded_serial() {
            write!(f, "{:02x}", b)?;
        }
        writeln!(f, ")")?;
        writeln!(f, "time:      {:016x}", self.time)?;
        writeln!(f, "bias:      {}", self.bias)?;
        writeln!(f, "lang:      {}", self.lang)?;
        writeln!(f, "device ID: {}", self.device_id)?;
        writeln!(f, "size:      {} Mb", self.size_megabits)?;
        write!(f, "encoding:  {}", self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_page() -> [u8; READ_PAGE_SIZE] {
        let mut page = [0xFFu8; READ_PAGE_SIZE];
        page[..0x26].fill(0);
        page
    }

    #[test]
    fn test_parse_fields() {
        let mut page = blank_page();
        page[0x0C..0x14].copy_from_slice(&0x0123_4567_89AB_CDEFu64.to_be_bytes());
        page[0x14..0x18].copy_from_slice(&7u32.to_be_bytes());
        page[0x22..0x24].copy_from_slice(&16u16.to_be_bytes());
        page[0x24..0x26].copy_from_slice(&1u16.to_be_bytes());

        let header = CardHeader::parse(&page);
        assert_eq!(header.time, 0x0123_4567_89AB_CDEF);
        assert_eq!(header.bias, 7);
        assert_eq!(header.size_megabits, 16);
        assert_eq!(header.encoding, 1);
    }

    #[test]
    fn test_checksums_valid() {
        let mut page = [0u8; READ_PAGE_SIZE];
        // 0x1FC zero bytes: sum 0, inverted sum -(0xFE) = 0xFF02
        page[0x1FC..].copy_from_slice(&[0x00, 0x00, 0xFF, 0x02]);
        assert!(CardHeader::parse(&page).checksums_valid());

        page[0x100] = 1;
        assert!(!CardHeader::parse(&page).checksums_valid());
    }

    #[test]
    fn test_decoded_serial() {
        let mut page = blank_page();
        page[0x0C..0x14].copy_from_slice(&0x0123_4567_89AB_CDEFu64.to_be_bytes());
        let header = CardHeader::parse(&page);
        assert_eq!(
            header.decoded_serial(),
            [0x41, 0x8C, 0xF9, 0x2F, 0xF3, 0x62, 0xF1, 0x9E, 0x65, 0xEE, 0xA8, 0xC3]
        );
    }

    #[test]
    fn test_zero_time_leaves_serial_unchanged() {
        let mut page = blank_page();
        page[..FLASH_ID_LEN].copy_from_slice(b"ABCDEFGHIJKL");
        let header = CardHeader::parse(&page);
        assert!(header.matches_flash_id(b"ABCDEFGHIJKL"));
    }
}
