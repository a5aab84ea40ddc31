//! gcmemcard-linux-spi - Linux spidev bus for GameCube memory cards
//!
//! This crate drives a memory card slot wired to a host SPI controller
//! exposed as `/dev/spidevX.Y`. The card's INT line can optionally be
//! wired to a GPIO and is then watched through the GPIO character device
//! instead of polling the status register.
//!
//! # Example
//!
//! ```no_run
//! use gcmemcard_linux_spi::{LinuxSpi, LinuxSpiConfig};
//! use gcmemcard_core::session::CardSession;
//!
//! // INT on line 25 of the first GPIO chip
//! let config = LinuxSpiConfig::new("/dev/spidev0.0")
//!     .with_speed(8_000_000)
//!     .with_int_line("/dev/gpiochip0", 25);
//! let bus = LinuxSpi::open(&config)?;
//!
//! let mut session = CardSession::new(bus);
//! let geometry = session.open()?;
//! println!("{} blocks", geometry.block_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with the gcmemcard CLI
//!
//! ```bash
//! # Poll the status register
//! gcmemcard -b linux_spi:dev=/dev/spidev0.0 read -o card.raw
//!
//! # Wait on the INT line instead
//! gcmemcard -b linux_spi:dev=/dev/spidev0.0,gpiochip=0,int=25 info
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - Read/write access to `/dev/spidevX.Y` (and `/dev/gpiochipN` for INT)
//! - A spidev buffer of at least one page plus header; raise
//!   `spidev.bufsiz` if the kernel default is smaller

pub mod device;
pub mod error;
pub mod ready;

// Re-exports
pub use device::{mode, parse_options, LinuxSpi, LinuxSpiConfig};
pub use error::{LinuxSpiError, Result};
pub use ready::ReadyLine;

/// Open a Linux SPI bus and return a boxed Transport
///
/// This is a convenience function for use in the CLI bus dispatch.
///
/// # Example Options
///
/// - `dev=/dev/spidev0.0` - Required: device path
/// - `spispeed=16000` - Optional: speed in kHz (default: 16000)
/// - `mode=0` - Optional: SPI mode 0-3 (default: 0)
/// - `gpiochip=0,int=25` - Optional: INT line
pub fn open_linux_spi(
    options: &[(&str, &str)],
) -> std::result::Result<
    Box<dyn gcmemcard_core::transport::Transport + Send>,
    Box<dyn std::error::Error>,
> {
    let config = parse_options(options)?;
    let spi = LinuxSpi::open(&config)?;
    Ok(Box::new(spi))
}
