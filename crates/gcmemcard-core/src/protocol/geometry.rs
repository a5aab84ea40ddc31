//! Card geometry and the device size-class table
//!
//! Cards describe themselves through a 32-bit identification word:
//!
//! ```text
//!  3          2          1          0
//! 10987654 32109876 54321098 76543210
//! ........ ........ ........ xxxxxx.. size class (units of 512 KiB)
//! ........ ........ .....xxx ........ read latency (index)
//! ........ ........ ..xxx... ........ erase sector size (index)
//! xxxxxxxx xxxxxxxx xx...... ......xx must be zero
//! ```
//!
//! The mapping from those fields to concrete sizes is a fixed table per
//! device generation, injected into the protocol as a [`DeviceProfile`].

use super::checksum::Integrity;
use crate::error::{Error, Result};

/// Bits of the identification word that are zero on every memory card
pub const ID_RESERVED_MASK: u32 = 0xFFFF_C003;

const ID_SIZE_SHIFT: u32 = 2;
const ID_SIZE_MASK: u32 = 0x3F;
const ID_LATENCY_SHIFT: u32 = 8;
const ID_LATENCY_MASK: u32 = 0x7;
const ID_SECTOR_SHIFT: u32 = 11;
const ID_SECTOR_MASK: u32 = 0x7;

/// Bytes per size-class unit
const SIZE_UNIT: u32 = 512 * 1024;

/// Geometry of the connected card
///
/// Always obtained from the card itself; different capacities exist and
/// nothing about them may be assumed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardGeometry {
    /// Block (erase sector) size in bytes
    pub block_size: u32,
    /// Number of blocks on the card
    pub block_count: u32,
    /// Raw identification word as returned by the card
    pub uid: u32,
}

impl CardGeometry {
    /// Total card capacity in bytes
    pub fn capacity(&self) -> usize {
        self.block_size as usize * self.block_count as usize
    }

    /// Byte offset of a block
    pub fn block_offset(&self, index: u32) -> usize {
        index as usize * self.block_size as usize
    }

    /// Card capacity in megabits, as printed on the label
    pub fn size_megabits(&self) -> u32 {
        (self.capacity() / (128 * 1024)) as u32
    }

    /// Returns true if `index` addresses a block on this card
    pub fn contains(&self, index: u32) -> bool {
        index < self.block_count
    }
}

/// One entry of the size-class table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Size field value in the identification word
    pub code: u8,
    /// Retail name of the card
    pub name: &'static str,
}

impl SizeClass {
    /// Capacity in bytes
    pub const fn capacity(&self) -> u32 {
        self.code as u32 * SIZE_UNIT
    }
}

/// Fixed description of a card generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Generation name
    pub name: &'static str,
    /// Known size classes
    pub size_classes: &'static [SizeClass],
    /// Erase sector sizes by index
    pub sector_sizes: &'static [u32],
    /// Read turnaround byte counts by latency index
    pub turnaround_bytes: &'static [usize],
    /// How block payloads are validated
    pub integrity: Integrity,
}

/// Official GameCube memory card generation
pub const GAMECUBE: DeviceProfile = DeviceProfile {
    name: "GameCube memory card",
    size_classes: &[
        SizeClass { code: 1, name: "Memory Card 59" },
        SizeClass { code: 2, name: "Memory Card 123" },
        SizeClass { code: 4, name: "Memory Card 251" },
        SizeClass { code: 8, name: "Memory Card 507" },
        SizeClass { code: 16, name: "Memory Card 1019" },
        SizeClass { code: 32, name: "Memory Card 2043" },
    ],
    sector_sizes: &[0x2000, 0x4000, 0x8000, 0x10000, 0x20000, 0x40000],
    turnaround_bytes: &[4, 8, 16, 32, 64, 128, 256, 512],
    integrity: Integrity::Reread,
};

/// Everything the identification word tells about a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Block layout
    pub geometry: CardGeometry,
    /// Matching size-class table entry
    pub size_class: SizeClass,
    /// Zero bytes to clock between a read command and its data
    pub turnaround: usize,
}

impl DeviceProfile {
    /// Decode an identification word against this profile's tables
    pub fn decode(&self, id: u32) -> Result<Identity> {
        if id == 0 {
            return Err(Error::NoCard);
        }
        if id & ID_RESERVED_MASK != 0 {
            return Err(Error::NotAMemoryCard { id });
        }

        let size_code = ((id >> ID_SIZE_SHIFT) & ID_SIZE_MASK) as u8;
        let latency = ((id >> ID_LATENCY_SHIFT) & ID_LATENCY_MASK) as usize;
        let sector = ((id >> ID_SECTOR_SHIFT) & ID_SECTOR_MASK) as usize;

        let size_class = *self
            .size_classes
            .iter()
            .find(|c| c.code == size_code)
            .ok_or(Error::UnrecognizedDevice { id })?;
        let block_size = *self
            .sector_sizes
            .get(sector)
            .ok_or(Error::UnrecognizedDevice { id })?;
        let turnaround = *self
            .turnaround_bytes
            .get(latency)
            .ok_or(Error::UnrecognizedDevice { id })?;

        if size_class.capacity() % block_size != 0 {
            return Err(Error::UnrecognizedDevice { id });
        }

        Ok(Identity {
            geometry: CardGeometry {
                block_size,
                block_count: size_class.capacity() / block_size,
                uid: id,
            },
            size_class,
            turnaround,
        })
    }

    /// Find the size class with the given capacity in bytes
    pub fn size_class_for_capacity(&self, capacity: u32) -> Option<&SizeClass> {
        self.size_classes.iter().find(|c| c.capacity() == capacity)
    }
}

/// Build the identification word for a card
///
/// Inverse of [`DeviceProfile::decode`], used by card emulators.
pub const fn encode_id(size_code: u8, latency_index: u8, sector_index: u8) -> u32 {
    ((size_code as u32 & ID_SIZE_MASK) << ID_SIZE_SHIFT)
        | ((latency_index as u32 & ID_LATENCY_MASK) << ID_LATENCY_SHIFT)
        | ((sector_index as u32 & ID_SECTOR_MASK) << ID_SECTOR_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_memory_card_59() {
        let ident = GAMECUBE.decode(0x0000_0004).unwrap();
        assert_eq!(ident.geometry.block_size, 0x2000);
        assert_eq!(ident.geometry.block_count, 64);
        assert_eq!(ident.geometry.capacity(), 512 * 1024);
        assert_eq!(ident.geometry.size_megabits(), 4);
        assert_eq!(ident.turnaround, 4);
        assert_eq!(ident.size_class.name, "Memory Card 59");
    }

    #[test]
    fn test_decode_latency_and_sector_fields() {
        let id = encode_id(8, 3, 1);
        let ident = GAMECUBE.decode(id).unwrap();
        assert_eq!(ident.geometry.block_size, 0x4000);
        assert_eq!(ident.geometry.block_count, 256);
        assert_eq!(ident.turnaround, 32);
        assert_eq!(ident.geometry.uid, id);
    }

    #[test]
    fn test_decode_rejects_empty_slot() {
        assert_eq!(GAMECUBE.decode(0), Err(Error::NoCard));
    }

    #[test]
    fn test_decode_rejects_other_devices() {
        assert_eq!(
            GAMECUBE.decode(0x0000_0003),
            Err(Error::NotAMemoryCard { id: 3 })
        );
        assert_eq!(
            GAMECUBE.decode(0x0401_0000),
            Err(Error::NotAMemoryCard { id: 0x0401_0000 })
        );
    }

    #[test]
    fn test_decode_unknown_size_class() {
        let id = encode_id(3, 0, 0);
        assert_eq!(GAMECUBE.decode(id), Err(Error::UnrecognizedDevice { id }));
    }

    #[test]
    fn test_decode_unknown_sector_size() {
        let id = encode_id(1, 0, 6);
        assert_eq!(GAMECUBE.decode(id), Err(Error::UnrecognizedDevice { id }));
    }

    #[test]
    fn test_size_class_lookup() {
        let class = GAMECUBE.size_class_for_capacity(2 * 1024 * 1024).unwrap();
        assert_eq!(class.name, "Memory Card 251");
    }
}
