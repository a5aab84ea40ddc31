//! CLI command implementations
//!
//! Every command opens a [`CardSession`] on the selected bus, does its work
//! and puts the card back to sleep, also when the work failed.

mod info;
mod list;
mod read;
mod write;

pub use info::run_info;
pub use list::list_buses;
pub use read::run_read;
pub use write::run_write;

use crate::bus::{self, BoxedBus};
use gcmemcard_core::protocol::ProtocolConfig;
use gcmemcard_core::session::CardSession;
use gcmemcard_core::sync::{SyncProgress, WriteStats};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Settings shared by the commands that talk to a card
pub struct CardOptions {
    /// Bus string as given with `-b`
    pub bus: String,
    /// Retry bounds and timeouts
    pub config: ProtocolConfig,
    /// Set from the SIGINT handler
    pub cancel: Arc<AtomicBool>,
}

/// Open the bus and wrap it in a session
fn open_session(
    options: &CardOptions,
) -> Result<CardSession<BoxedBus>, Box<dyn std::error::Error>> {
    let transport = bus::open_bus(&options.bus)?;
    Ok(CardSession::with_config(transport, options.config)
        .with_cancel_flag(options.cancel.clone()))
}

/// Put the card to sleep, then hand back `result`
///
/// A failure to sleep only matters when the work itself succeeded.
fn close_session<T>(
    session: CardSession<BoxedBus>,
    result: gcmemcard_core::Result<T>,
) -> Result<T, Box<dyn std::error::Error>> {
    match result {
        Ok(value) => {
            session.close()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(close_err) = session.close() {
                log::debug!("Could not put card to sleep: {}", close_err);
            }
            Err(e.into())
        }
    }
}

/// Read an image file
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let data = std::fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    log::debug!("Read {} bytes from {:?}", data.len(), path);
    Ok(data)
}

/// Write an image file
fn write_file(path: &Path, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, data).map_err(|e| format!("Failed to write {:?}: {}", path, e))?;
    Ok(())
}

/// Create a progress bar counting blocks for one phase
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} blocks ({{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress reporter using indicatif
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_bar(&mut self, total: usize, phase: &'static str) {
        self.finish();
        let total = total as u64;
        let pb = self.multi.add(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
        self.current_bar = Some(pb);
    }

    fn set_position(&self, done: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(done as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish();
        }
    }

    /// Leave the current bar where it stopped
    pub fn abandon(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProgress for IndicatifProgress {
    fn reading(&mut self, total_blocks: usize) {
        self.create_bar(total_blocks, "Reading");
    }

    fn read_progress(&mut self, blocks_read: usize) {
        self.set_position(blocks_read);
    }

    fn writing(&mut self, blocks_to_write: usize) {
        self.create_bar(blocks_to_write, "Writing");
    }

    fn write_progress(&mut self, blocks_written: usize) {
        self.set_position(blocks_written);
    }

    fn verifying(&mut self, blocks_to_verify: usize) {
        self.create_bar(blocks_to_verify, "Verifying");
    }

    fn verify_progress(&mut self, blocks_verified: usize) {
        self.set_position(blocks_verified);
    }

    fn complete(&mut self, stats: &WriteStats) {
        self.finish();

        if !stats.card_modified() {
            println!("Card already contains the target image - no changes needed");
        } else {
            println!(
                "Smart write: {} of {} blocks changed, {} blocks written ({} bytes){}",
                stats.blocks_changed,
                stats.blocks_total,
                stats.blocks_written,
                stats.bytes_written,
                if stats.verified { ", verified" } else { "" }
            );
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const CARD_SIZE: usize = 512 * 1024;
    const BLOCK: usize = 0x2000;

    fn options(bus: String) -> CardOptions {
        CardOptions {
            bus,
            config: ProtocolConfig::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn card_file(dir: &TempDir) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..CARD_SIZE).map(|i| (i * 7 + i / 251) as u8).collect();
        let path = dir.path().join("card.raw");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn dummy_bus(image: &Path) -> String {
        format!("dummy:image={}", image.display())
    }

    #[test]
    fn test_read_writes_card_to_file() {
        let dir = TempDir::new().unwrap();
        let (card, data) = card_file(&dir);
        let output = dir.path().join("dump.raw");

        run_read(&options(dummy_bus(&card)), &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), data);
    }

    #[test]
    fn test_write_identical_images_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (card, _) = card_file(&dir);

        let stats = run_write(&options(dummy_bus(&card)), &card, &card, true).unwrap();
        assert_eq!(stats.blocks_changed, 0);
        assert!(!stats.card_modified());
    }

    #[test]
    fn test_write_changed_blocks() {
        let dir = TempDir::new().unwrap();
        let (card, mut data) = card_file(&dir);
        data[3 * BLOCK + 17] ^= 0x5A;
        data[40 * BLOCK] ^= 0x01;
        let target = dir.path().join("target.raw");
        std::fs::write(&target, &data).unwrap();

        let stats = run_write(&options(dummy_bus(&card)), &card, &target, true).unwrap();
        assert_eq!(stats.blocks_changed, 2);
        assert_eq!(stats.blocks_written, 2);
        assert!(stats.verified);
    }

    #[test]
    fn test_write_size_mismatch_before_bus_is_opened() {
        let dir = TempDir::new().unwrap();
        let (card, data) = card_file(&dir);
        let short = dir.path().join("short.raw");
        std::fs::write(&short, &data[..CARD_SIZE - BLOCK]).unwrap();

        // The bus name is bogus, so reaching the bus would fail differently
        let err = run_write(&options("nowhere".into()), &card, &short, true).unwrap_err();
        let err = err.downcast_ref::<gcmemcard_core::Error>().unwrap();
        assert!(err.is_preflight());
    }

    #[test]
    fn test_write_image_not_matching_card() {
        let dir = TempDir::new().unwrap();
        let (card, data) = card_file(&dir);
        let small = dir.path().join("small.raw");
        std::fs::write(&small, &data[..CARD_SIZE / 2]).unwrap();

        let err = run_write(&options(dummy_bus(&card)), &small, &small, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<gcmemcard_core::Error>(),
            Some(&gcmemcard_core::Error::ImageSizeMismatch {
                expected: CARD_SIZE,
                found: CARD_SIZE / 2,
            })
        );
    }

    #[test]
    fn test_cancelled_read_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let (card, _) = card_file(&dir);
        let output = dir.path().join("dump.raw");
        let opts = options(dummy_bus(&card));
        opts.cancel.store(true, std::sync::atomic::Ordering::Relaxed);

        let err = run_read(&opts, &output).unwrap_err();
        assert_eq!(
            err.downcast_ref::<gcmemcard_core::Error>(),
            Some(&gcmemcard_core::Error::Interrupted { block: 0 })
        );
        assert!(!output.exists());
    }

    #[test]
    fn test_info_on_dummy_card() {
        let dir = TempDir::new().unwrap();
        let (card, _) = card_file(&dir);
        run_info(&options(dummy_bus(&card))).unwrap();
    }
}
