//! `info` command

use super::{close_session, open_session, CardOptions};
use crate::bus::BoxedBus;
use gcmemcard_core::session::CardSession;

fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Print card identification, status and header
pub fn run_info(options: &CardOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = open_session(options)?;
    let result = print_card_info(&mut session);
    close_session(session, result)
}

fn print_card_info(session: &mut CardSession<BoxedBus>) -> gcmemcard_core::Result<()> {
    let geometry = session.open()?;

    println!("Memory Card Information");
    println!("=======================");
    println!();

    if let Some(identity) = session.identity() {
        println!("Model:           {}", identity.size_class.name);
        println!("ID word:         0x{:08X}", geometry.uid);
        println!(
            "Size:            {} ({} Mbit)",
            format_size(geometry.capacity()),
            geometry.size_megabits()
        );
        println!(
            "Blocks:          {} x {}",
            geometry.block_count,
            format_size(geometry.block_size as usize)
        );
        println!("Turnaround:      {} bytes", identity.turnaround);
    }
    println!(
        "Completion:      {}",
        if session.uses_ready_line() {
            "INT line"
        } else {
            "status polling"
        }
    );

    let vendor_id = session.vendor_id()?;
    println!("Vendor ID:       0x{:04X}", vendor_id);
    let status = session.status()?;
    println!("Status:          0x{:02X} {:?}", status.bits(), status);

    let flash_id = session.flash_id().copied();
    if let Some(id) = &flash_id {
        println!("Flash ID:        {}", hex(id));
    }

    let header = session.read_header()?;
    println!();
    println!("Card header");
    println!("-----------");
    println!("{}", header);

    let checksums = if header.checksums_valid() {
        "OK".to_string()
    } else {
        format!(
            "MISMATCH (stored {:04X}/{:04X}, computed {:04X}/{:04X})",
            header.checksums.0,
            header.checksums.1,
            header.computed_checksums.0,
            header.computed_checksums.1
        )
    };
    println!("Checksums:       {}", checksums);

    match flash_id {
        Some(id) if header.matches_flash_id(&id) => {
            println!("Serial:          matches flash ID")
        }
        Some(_) => println!(
            "Serial:          does not match flash ID (decodes to {})",
            hex(&header.decoded_serial())
        ),
        None => println!("Serial:          not checked (card was already unlocked)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512 * 1024), "512 KiB");
        assert_eq!(format_size(16 * 1024 * 1024), "16 MiB");
        assert_eq!(format_size(100), "100 B");
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xDE, 0xAD, 0x01]), "DEAD01");
    }
}
