//! Read and write flows
//!
//! These tie the session and the diff engine together:
//!
//! - [`read_card`] opens the card and dumps every block.
//! - [`write_card`] opens the card, checks both images against the live
//!   geometry, and rewrites only the blocks where the target differs from
//!   the baseline.
//!
//! The baseline is trusted to describe the card's current contents; the
//! card is not read back to build the diff.

use crate::diff;
use crate::error::Result;
use crate::image::{check_size, Image};
use crate::session::CardSession;
use crate::transport::Transport;

/// Progress callback for read and write runs
///
/// Counts are in blocks.
pub trait SyncProgress {
    /// Called when starting to read the card
    fn reading(&mut self, total_blocks: usize);

    /// Called after each block is read
    fn read_progress(&mut self, blocks_read: usize);

    /// Called when starting to write changed blocks
    fn writing(&mut self, blocks_to_write: usize);

    /// Called after each block is written
    fn write_progress(&mut self, blocks_written: usize);

    /// Called when starting to verify written blocks
    fn verifying(&mut self, blocks_to_verify: usize);

    /// Called after each block is verified
    fn verify_progress(&mut self, blocks_verified: usize);

    /// Called when a write run is complete
    fn complete(&mut self, stats: &WriteStats);
}

/// A no-op progress reporter
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn reading(&mut self, _total_blocks: usize) {}
    fn read_progress(&mut self, _blocks_read: usize) {}
    fn writing(&mut self, _blocks_to_write: usize) {}
    fn write_progress(&mut self, _blocks_written: usize) {}
    fn verifying(&mut self, _blocks_to_verify: usize) {}
    fn verify_progress(&mut self, _blocks_verified: usize) {}
    fn complete(&mut self, _stats: &WriteStats) {}
}

/// Options for [`write_card`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Read back every written block and compare it with the target
    pub verify: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Statistics from a write run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Number of blocks on the card
    pub blocks_total: usize,
    /// Number of blocks that differ between baseline and target
    pub blocks_changed: usize,
    /// Number of blocks erased and programmed
    pub blocks_written: usize,
    /// Total bytes programmed
    pub bytes_written: usize,
    /// Whether the written blocks were read back and compared
    pub verified: bool,
}

impl WriteStats {
    /// Whether the run touched the card at all
    pub fn card_modified(&self) -> bool {
        self.blocks_written > 0
    }
}

/// Open the card and read its full contents
pub fn read_card<T, P>(session: &mut CardSession<T>, progress: &mut P) -> Result<Image>
where
    T: Transport,
    P: SyncProgress + ?Sized,
{
    session.open()?;
    session.read_image(progress)
}

/// Open the card and rewrite the blocks where `target` differs from `baseline`
///
/// Both images are checked against the card's geometry before the card is
/// woken, unlocked or written. If they are identical no erase or program
/// command is sent.
pub fn write_card<T, P>(
    session: &mut CardSession<T>,
    baseline: &[u8],
    target: &[u8],
    options: WriteOptions,
    progress: &mut P,
) -> Result<WriteStats>
where
    T: Transport,
    P: SyncProgress + ?Sized,
{
    // Only the identification word is read before the images are checked
    let geometry = session.identify()?;
    check_size(baseline.len(), &geometry)?;
    check_size(target.len(), &geometry)?;
    session.open()?;

    let changed = diff::diff(baseline, target, &geometry)?;
    let mut stats = WriteStats {
        blocks_total: geometry.block_count as usize,
        blocks_changed: changed.len(),
        ..Default::default()
    };

    if changed.is_empty() {
        log::info!("No changes, card already matches target image");
        progress.complete(&stats);
        return Ok(stats);
    }

    log::info!(
        "{} of {} blocks differ",
        stats.blocks_changed,
        stats.blocks_total
    );
    let target = Image::new(target.to_vec(), geometry)?;
    stats.blocks_written = session.write_blocks(&changed, &target, progress)?;
    stats.bytes_written = stats.blocks_written * geometry.block_size as usize;

    if options.verify {
        session.verify_blocks(&changed, &target, progress)?;
        stats.verified = true;
    }

    progress.complete(&stats);
    Ok(stats)
}
