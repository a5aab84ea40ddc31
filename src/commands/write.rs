//! `write` command

use super::{close_session, open_session, read_file, CardOptions, IndicatifProgress};
use gcmemcard_core::sync::{self, WriteOptions, WriteStats};
use std::path::Path;

/// Rewrite the blocks where `target` differs from `baseline`
pub fn run_write(
    options: &CardOptions,
    baseline: &Path,
    target: &Path,
    verify: bool,
) -> Result<WriteStats, Box<dyn std::error::Error>> {
    let baseline = read_file(baseline)?;
    let target = read_file(target)?;

    // Catch the obvious mistake before the bus is even opened
    if baseline.len() != target.len() {
        return Err(gcmemcard_core::Error::ImageSizeMismatch {
            expected: baseline.len(),
            found: target.len(),
        }
        .into());
    }

    let mut session = open_session(options)?;
    let mut progress = IndicatifProgress::new();

    let result = sync::write_card(
        &mut session,
        &baseline,
        &target,
        WriteOptions { verify },
        &mut progress,
    );
    progress.abandon();
    close_session(session, result)
}
