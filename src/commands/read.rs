//! `read` command

use super::{close_session, open_session, write_file, CardOptions, IndicatifProgress};
use gcmemcard_core::sync;
use std::path::Path;

/// Dump the whole card to `output`
///
/// The file is only created once every block has been read.
pub fn run_read(options: &CardOptions, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = open_session(options)?;
    let mut progress = IndicatifProgress::new();

    let result = sync::read_card(&mut session, &mut progress);
    progress.abandon();
    let image = close_session(session, result)?;

    write_file(output, image.as_bytes())?;
    println!(
        "Read {} blocks ({} bytes) to {:?}",
        image.geometry().block_count,
        image.as_bytes().len(),
        output
    );
    Ok(())
}
