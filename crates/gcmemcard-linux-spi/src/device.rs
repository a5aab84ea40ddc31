//! Linux SPI device implementation
//!
//! This module provides the `LinuxSpi` struct that implements the
//! `Transport` trait using Linux's spidev interface, with the card's INT
//! line optionally wired to a GPIO.

use crate::error::{LinuxSpiError, Result};
use crate::ready::ReadyLine;

use gcmemcard_core::error::{Error as CoreError, Result as CoreResult};
use gcmemcard_core::transport::{default_send, BusCommand, Transport};

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

/// Path to kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// Default SPI clock speed in Hz (16 MHz, the card's EXI clock)
const DEFAULT_SPEED_HZ: u32 = 16_000_000;

/// SPI mode constants
pub mod mode {
    /// SPI mode 0: CPOL=0, CPHA=0 (what the card speaks)
    pub const MODE_0: u8 = 0;
}

/// Linux spidev ioctl constants
mod ioctl {
    use nix::ioctl_write_ptr;

    // SPI ioctl magic number
    const SPI_IOC_MAGIC: u8 = b'k';

    // SPI ioctl type numbers
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// Size of struct spi_ioc_transfer
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// Calculate ioctl number for SPI_IOC_MESSAGE(n)
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        // _IOW(SPI_IOC_MAGIC, 0, char[size])
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

/// SPI transfer structure for ioctl
/// This must match the kernel's struct spi_ioc_transfer layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,          // __u64 tx_buf
    rx_buf: u64,          // __u64 rx_buf
    len: u32,             // __u32 len
    speed_hz: u32,        // __u32 speed_hz
    delay_usecs: u16,     // __u16 delay_usecs
    bits_per_word: u8,    // __u8 bits_per_word
    cs_change: u8,        // __u8 cs_change
    tx_nbits: u8,         // __u8 tx_nbits
    rx_nbits: u8,         // __u8 rx_nbits
    word_delay_usecs: u8, // __u8 word_delay_usecs
    _pad: u8,             // padding
}

impl SpiIocTransfer {
    fn new(tx: Option<&[u8]>, rx: Option<&mut [u8]>, len: usize, speed_hz: u32) -> Self {
        Self {
            tx_buf: tx.map_or(0, |b| b.as_ptr() as u64),
            rx_buf: rx.map_or(0, |b| b.as_mut_ptr() as u64),
            len: len as u32,
            speed_hz,
            bits_per_word: 8,
            ..Default::default()
        }
    }
}

/// Configuration for opening a Linux SPI device
#[derive(Debug, Clone)]
pub struct LinuxSpiConfig {
    /// Device path (e.g., "/dev/spidev0.0")
    pub device: String,
    /// SPI clock speed in Hz (default: 16 MHz)
    pub speed_hz: u32,
    /// SPI mode (0-3, default: 0)
    pub mode: u8,
    /// GPIO chip the card's INT line is wired to
    pub gpiochip: Option<String>,
    /// Line offset of the INT line on `gpiochip`
    pub int_line: Option<u32>,
}

impl Default for LinuxSpiConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            speed_hz: DEFAULT_SPEED_HZ,
            mode: mode::MODE_0,
            gpiochip: None,
            int_line: None,
        }
    }
}

impl LinuxSpiConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the SPI clock speed in Hz
    pub fn with_speed(mut self, speed_hz: u32) -> Self {
        self.speed_hz = speed_hz;
        self
    }

    /// Set the SPI mode (0-3)
    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    /// Use the INT line `line` on `chip` for completion signalling
    pub fn with_int_line(mut self, chip: impl Into<String>, line: u32) -> Self {
        self.gpiochip = Some(chip.into());
        self.int_line = Some(line);
        self
    }
}

/// Memory card bus using spidev (and optionally a GPIO for INT)
pub struct LinuxSpi {
    /// File handle for spidev device
    file: File,
    /// Maximum kernel buffer size
    max_kernel_buf_size: usize,
    /// Current speed in Hz
    speed_hz: u32,
    /// Card INT line, if wired
    ready: Option<ReadyLine>,
}

impl LinuxSpi {
    /// Open a Linux SPI device with the given configuration
    pub fn open(config: &LinuxSpiConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxSpiError::NoDevice);
        }

        log::debug!("linux_spi: Opening device {}", config.device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxSpiError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();

        let mode = config.mode;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| LinuxSpiError::SetModeFailed {
                mode,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
        }

        // Set bits per word (always 8)
        let bits: u8 = 8;
        unsafe {
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits).map_err(|e| {
                LinuxSpiError::SetBitsPerWordFailed {
                    bits,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        let speed = config.speed_hz;
        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed).map_err(|e| {
                LinuxSpiError::SetSpeedFailed {
                    speed,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        let ready = match (&config.gpiochip, config.int_line) {
            (Some(chip), Some(line)) => Some(ReadyLine::open(chip, line)?),
            _ => None,
        };

        log::info!(
            "linux_spi: Opened {} (mode={}, speed={} kHz, {})",
            config.device,
            mode,
            speed / 1000,
            match &ready {
                Some(line) => format!("INT on line {}", line.offset()),
                None => "status polling".to_string(),
            }
        );

        let max_kernel_buf_size = get_max_kernel_buf_size();
        log::debug!(
            "linux_spi: Max kernel buffer size: {} bytes",
            max_kernel_buf_size
        );

        Ok(Self {
            file,
            max_kernel_buf_size,
            speed_hz: speed,
            ready,
        })
    }

    /// Perform an SPI transfer
    ///
    /// This implements the SPI_IOC_MESSAGE ioctl with up to two transfers
    /// under one chip select: a transmit-only phase and a receive-only one.
    fn spi_transfer(&mut self, write_data: &[u8], read_buf: &mut [u8]) -> Result<()> {
        let len = write_data.len() + read_buf.len();
        if len > self.max_kernel_buf_size {
            return Err(LinuxSpiError::TransferTooLong {
                len,
                max: self.max_kernel_buf_size,
            });
        }
        if write_data.is_empty() {
            return Err(LinuxSpiError::InvalidParameter(
                "Write data cannot be empty".into(),
            ));
        }

        let mut transfers = vec![SpiIocTransfer::new(
            Some(write_data),
            None,
            write_data.len(),
            self.speed_hz,
        )];
        if !read_buf.is_empty() {
            let read_len = read_buf.len();
            transfers.push(SpiIocTransfer::new(
                None,
                Some(read_buf),
                read_len,
                self.speed_hz,
            ));
        }

        self.submit(&transfers)
    }

    fn submit(&self, transfers: &[SpiIocTransfer]) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let ioctl_num = ioctl::spi_ioc_message(transfers.len() as u8);
        let ret = unsafe { libc::ioctl(fd, ioctl_num, transfers.as_ptr()) };

        if ret < 0 {
            return Err(LinuxSpiError::TransferFailed(
                std::io::Error::last_os_error(),
            ));
        }

        Ok(())
    }
}

impl Transport for LinuxSpi {
    fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> CoreResult<()> {
        default_send(cmd, |tx, rx| {
            self.spi_transfer(tx, rx).map_err(|e| {
                log::error!("linux_spi: {}", e);
                CoreError::Bus { block: None }
            })
        })
    }

    fn exchange_byte(&mut self, byte: u8) -> CoreResult<u8> {
        let tx = [byte];
        let mut rx = [0u8];
        let transfer = SpiIocTransfer::new(Some(&tx), Some(&mut rx), 1, self.speed_hz);
        self.submit(&[transfer]).map_err(|e| {
            log::error!("linux_spi: {}", e);
            CoreError::Bus { block: None }
        })?;
        Ok(rx[0])
    }

    fn has_ready_line(&self) -> bool {
        self.ready.is_some()
    }

    fn wait_ready(&mut self, timeout: Duration) -> CoreResult<Option<Duration>> {
        let Some(line) = self.ready.as_mut() else {
            return Ok(None);
        };
        let start = Instant::now();
        let fired = line.wait_falling_edge(timeout).map_err(|e| {
            log::error!("linux_spi: {}", e);
            CoreError::Bus { block: None }
        })?;
        Ok(fired.then(|| start.elapsed()))
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }
}

/// Read the maximum kernel buffer size from sysfs, or use page size as fallback
fn get_max_kernel_buf_size() -> usize {
    if let Ok(content) = std::fs::read_to_string(BUF_SIZE_SYSFS) {
        if let Ok(size) = content.trim().parse::<usize>() {
            if size > 0 {
                log::debug!("linux_spi: Using buffer size {} from sysfs", size);
                return size;
            }
        }
        log::warn!("linux_spi: Invalid buffer size in {}", BUF_SIZE_SYSFS);
    } else {
        log::debug!("linux_spi: Cannot read {}, using page size", BUF_SIZE_SYSFS);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    log::debug!("linux_spi: Using page size {} as buffer size", page_size);
    page_size
}

/// Parse bus options from a list of key-value pairs
///
/// - `dev=/dev/spidevX.Y` - required
/// - `spispeed=<kHz>` - default 16000
/// - `mode=<0-3>` - default 0
/// - `gpiochip=<path or N>` and `int=<line>` - INT line, both or neither
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<LinuxSpiConfig, String> {
    let mut config = LinuxSpiConfig::default();

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "spispeed" => {
                let speed_khz: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid spispeed value: {}", value))?;
                if speed_khz == 0 {
                    return Err("spispeed must be greater than 0".to_string());
                }
                config.speed_hz = speed_khz
                    .checked_mul(1000)
                    .ok_or_else(|| format!("spispeed value too large: {}", value))?;
            }
            "mode" => {
                let mode: u8 = value
                    .parse()
                    .map_err(|_| format!("Invalid mode value: {}", value))?;
                if mode > 3 {
                    return Err(format!("Invalid SPI mode: {} (must be 0-3)", mode));
                }
                config.mode = mode;
            }
            "gpiochip" => {
                // A bare number names /dev/gpiochipN
                config.gpiochip = Some(match value.parse::<u32>() {
                    Ok(n) => format!("/dev/gpiochip{}", n),
                    Err(_) => value.to_string(),
                });
            }
            "int" => {
                config.int_line = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid int line value: {}", value))?,
                );
            }
            _ => {
                log::warn!("linux_spi: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        return Err("No device specified. Use dev=/dev/spidevX.Y".to_string());
    }
    if config.gpiochip.is_some() != config.int_line.is_some() {
        return Err("gpiochip and int must be given together".to_string());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let config = parse_options(&[("dev", "/dev/spidev0.0")]).unwrap();
        assert_eq!(config.device, "/dev/spidev0.0");
        assert_eq!(config.speed_hz, 16_000_000);
        assert_eq!(config.mode, mode::MODE_0);
        assert!(config.int_line.is_none());
    }

    #[test]
    fn test_parse_options_int_line() {
        let config = parse_options(&[
            ("dev", "/dev/spidev0.0"),
            ("spispeed", "8000"),
            ("gpiochip", "0"),
            ("int", "25"),
        ])
        .unwrap();
        assert_eq!(config.speed_hz, 8_000_000);
        assert_eq!(config.gpiochip.as_deref(), Some("/dev/gpiochip0"));
        assert_eq!(config.int_line, Some(25));
    }

    #[test]
    fn test_parse_options_errors() {
        assert!(parse_options(&[]).is_err());
        assert!(parse_options(&[("dev", "/dev/spidev0.0"), ("mode", "4")]).is_err());
        assert!(parse_options(&[("dev", "/dev/spidev0.0"), ("int", "25")]).is_err());
        assert!(parse_options(&[("dev", "/dev/spidev0.0"), ("spispeed", "fast")]).is_err());
    }

    #[test]
    fn test_parse_options_speed_out_of_range() {
        let err = parse_options(&[("dev", "/dev/spidev0.0"), ("spispeed", "4294968")]).unwrap_err();
        assert!(err.contains("too large"));
        let config = parse_options(&[("dev", "/dev/spidev0.0"), ("spispeed", "4294967")]).unwrap();
        assert_eq!(config.speed_hz, 4_294_967_000);
    }

    #[test]
    fn test_ioc_message_number() {
        // _IOW('k', 0, char[32]) and char[64]
        assert_eq!(ioctl::spi_ioc_message(1), 0x4020_6B00);
        assert_eq!(ioctl::spi_ioc_message(2), 0x4040_6B00);
    }
}
