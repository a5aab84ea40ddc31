//! Block diff between two images
//!
//! Used to rewrite only the blocks of a card that changed. Both images are
//! fully resident and blocks are small, so this is a straight byte-wise
//! comparison of each block pair rather than a hash comparison.

use alloc::vec::Vec;

use crate::error::Result;
use crate::image::check_size;
use crate::protocol::CardGeometry;

/// Indices of the blocks that differ between two images
///
/// Indices are unique and ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDiff {
    indices: Vec<u32>,
}

impl BlockDiff {
    /// Build a diff from a list of indices (sorted and deduplicated)
    pub fn from_indices(mut indices: Vec<u32>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }

    /// Returns true if the images are identical
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of differing blocks
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if block `index` differs
    pub fn contains(&self, index: u32) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    /// Iterate over differing block indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// Differing block indices in ascending order
    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }
}

/// Compute which blocks of `target` differ from `baseline`
///
/// Both images must be exactly `geometry.capacity()` bytes long, otherwise
/// this fails with [`crate::Error::ImageSizeMismatch`] without guessing at
/// an alignment.
pub fn diff(baseline: &[u8], target: &[u8], geometry: &CardGeometry) -> Result<BlockDiff> {
    check_size(baseline.len(), geometry)?;
    check_size(target.len(), geometry)?;

    let block_size = geometry.block_size as usize;
    let indices = baseline
        .chunks_exact(block_size)
        .zip(target.chunks_exact(block_size))
        .enumerate()
        .filter(|(_, (old, new))| old != new)
        .map(|(i, _)| i as u32)
        .collect();

    Ok(BlockDiff { indices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use alloc::vec;

    const GEOMETRY: CardGeometry = CardGeometry {
        block_size: 32,
        block_count: 8,
        uid: 0,
    };

    /// Deterministic pseudo-random image
    fn noise(seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..GEOMETRY.capacity())
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    /// Copy the blocks named by `diff` from `src` into `dst`
    fn apply(dst: &mut [u8], src: &[u8], diff: &BlockDiff) {
        let bs = GEOMETRY.block_size as usize;
        for index in diff.iter() {
            let off = index as usize * bs;
            dst[off..off + bs].copy_from_slice(&src[off..off + bs]);
        }
    }

    #[test]
    fn test_identical_images_have_empty_diff() {
        for seed in 0..8 {
            let a = noise(seed);
            assert!(diff(&a, &a, &GEOMETRY).unwrap().is_empty());
        }
    }

    #[test]
    fn test_diff_is_symmetric() {
        for seed in 0..8 {
            let a = noise(seed);
            let mut b = a.clone();
            b[seed as usize * 17 % a.len()] ^= 0x5A;
            b[200] = !b[200];
            assert_eq!(
                diff(&a, &b, &GEOMETRY).unwrap(),
                diff(&b, &a, &GEOMETRY).unwrap()
            );
        }
    }

    #[test]
    fn test_applying_diff_reproduces_target() {
        for seed in 0..8 {
            let a = noise(seed);
            let b = noise(seed + 100);
            let d = diff(&a, &b, &GEOMETRY).unwrap();
            let mut patched = a.clone();
            apply(&mut patched, &b, &d);
            assert_eq!(patched, b);
        }
    }

    #[test]
    fn test_single_changed_byte_marks_its_block() {
        let a = vec![0xFF; GEOMETRY.capacity()];
        let mut b = a.clone();
        b[5 * 32 + 31] = 0x00;
        let d = diff(&a, &b, &GEOMETRY).unwrap();
        assert_eq!(d.as_slice(), &[5]);
        assert!(d.contains(5));
        assert!(!d.contains(4));
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let a = vec![0u8; GEOMETRY.capacity()];
        let short = vec![0u8; GEOMETRY.capacity() - 1];
        let long = vec![0u8; GEOMETRY.capacity() + 32];
        assert_eq!(
            diff(&a, &short, &GEOMETRY),
            Err(Error::ImageSizeMismatch {
                expected: 256,
                found: 255
            })
        );
        assert!(matches!(
            diff(&long, &a, &GEOMETRY),
            Err(Error::ImageSizeMismatch { found: 288, .. })
        ));
    }

    #[test]
    fn test_from_indices_sorts_and_dedups() {
        let d = BlockDiff::from_indices(vec![3, 1, 3, 2]);
        assert_eq!(d.as_slice(), &[1, 2, 3]);
        assert_eq!(d.len(), 3);
    }
}
