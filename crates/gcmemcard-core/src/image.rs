//! Whole-card images
//!
//! An [`Image`] is the raw concatenation of every block of a card, the same
//! layout other memory card tools read and write (`.raw` dumps). Its size
//! always matches the geometry it was created for.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::protocol::CardGeometry;

/// Check that a buffer of `len` bytes is a full image for `geometry`
pub fn check_size(len: usize, geometry: &CardGeometry) -> Result<()> {
    let expected = geometry.capacity();
    if len != expected {
        return Err(Error::ImageSizeMismatch {
            expected,
            found: len,
        });
    }
    Ok(())
}

/// Contents of a whole card
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
    geometry: CardGeometry,
}

impl Image {
    /// Wrap `data` as an image of a card with `geometry`
    ///
    /// Fails with [`Error::ImageSizeMismatch`] unless `data` is exactly
    /// the card capacity; images are never truncated or padded.
    pub fn new(data: Vec<u8>, geometry: CardGeometry) -> Result<Self> {
        check_size(data.len(), &geometry)?;
        Ok(Self { data, geometry })
    }

    /// Geometry this image was built for
    pub fn geometry(&self) -> &CardGeometry {
        &self.geometry
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Unwrap into the raw image bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes of block `index`, or `None` past the end of the card
    pub fn block(&self, index: u32) -> Option<&[u8]> {
        if !self.geometry.contains(index) {
            return None;
        }
        let start = self.geometry.block_offset(index);
        Some(&self.data[start..start + self.geometry.block_size as usize])
    }

    /// Iterate over all blocks in ascending order
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.geometry.block_size as usize)
    }
}

impl AsRef<[u8]> for Image {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl core::fmt::Debug for Image {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Image")
            .field("len", &self.data.len())
            .field("geometry", &self.geometry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const GEOMETRY: CardGeometry = CardGeometry {
        block_size: 16,
        block_count: 4,
        uid: 0,
    };

    #[test]
    fn test_new_rejects_short_image() {
        let err = Image::new(vec![0; 63], GEOMETRY).unwrap_err();
        assert_eq!(
            err,
            Error::ImageSizeMismatch {
                expected: 64,
                found: 63
            }
        );
    }

    #[test]
    fn test_new_rejects_long_image() {
        assert!(Image::new(vec![0; 65], GEOMETRY).is_err());
    }

    #[test]
    fn test_block_windows() {
        let data: Vec<u8> = (0..64).collect();
        let image = Image::new(data, GEOMETRY).unwrap();
        assert_eq!(image.block(1).unwrap()[0], 16);
        assert_eq!(image.block(3).unwrap().len(), 16);
        assert!(image.block(4).is_none());
        assert_eq!(image.blocks().count(), 4);
    }
}
