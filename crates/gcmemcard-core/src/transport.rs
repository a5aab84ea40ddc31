//! Bus transport abstraction
//!
//! A [`Transport`] drives the synchronous serial link the card hangs off:
//! it clocks command frames out and response bytes in, and watches the
//! card's ready (INT) line. It knows nothing about the meaning of the bytes
//! it moves; framing and integrity checks live in [`crate::protocol`].

use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use crate::error::Result;
use crate::protocol::address::AddressWidth;

/// A single chip-select framed bus transaction
///
/// Designed to avoid allocation - uses slices for data.
/// On the wire the transaction is:
///
/// ```text
/// opcode | address bytes | turnaround zeros | write_data | read_buf (clocked in)
/// ```
pub struct BusCommand<'a> {
    /// The opcode byte
    pub opcode: u8,

    /// Card byte address (if any)
    pub address: Option<u32>,

    /// How many encoded address bytes follow the opcode
    pub address_width: AddressWidth,

    /// Number of zero bytes clocked out before the payload
    pub turnaround: usize,

    /// Data to write after opcode/address/turnaround
    pub write_data: &'a [u8],

    /// Buffer to read into after the write phase
    pub read_buf: &'a mut [u8],
}

impl<'a> BusCommand<'a> {
    /// Create a command consisting of the opcode only (e.g. wake up, sleep)
    pub fn simple(opcode: u8) -> Self {
        Self {
            opcode,
            address: None,
            address_width: AddressWidth::None,
            turnaround: 0,
            write_data: &[],
            read_buf: &mut [],
        }
    }

    /// Create a command with argument bytes and no response
    pub fn write(opcode: u8, data: &'a [u8]) -> Self {
        Self {
            write_data: data,
            ..Self::simple(opcode)
        }
    }

    /// Create a command with argument bytes followed by a response
    pub fn query(opcode: u8, args: &'a [u8], buf: &'a mut [u8]) -> Self {
        Self {
            opcode,
            address: None,
            address_width: AddressWidth::None,
            turnaround: 0,
            write_data: args,
            read_buf: buf,
        }
    }

    /// Create an array read at `addr` with the given turnaround
    pub fn read_page(opcode: u8, addr: u32, turnaround: usize, buf: &'a mut [u8]) -> Self {
        Self {
            opcode,
            address: Some(addr),
            address_width: AddressWidth::Page,
            turnaround,
            write_data: &[],
            read_buf: buf,
        }
    }

    /// Create a page program at `addr`
    pub fn program_page(opcode: u8, addr: u32, data: &'a [u8]) -> Self {
        Self {
            opcode,
            address: Some(addr),
            address_width: AddressWidth::Page,
            turnaround: 0,
            write_data: data,
            read_buf: &mut [],
        }
    }

    /// Create a sector erase at `addr`
    pub fn erase_sector(opcode: u8, addr: u32) -> Self {
        Self {
            opcode,
            address: Some(addr),
            address_width: AddressWidth::Sector,
            turnaround: 0,
            write_data: &[],
            read_buf: &mut [],
        }
    }

    /// Number of bytes clocked out before `write_data`
    pub fn header_len(&self) -> usize {
        1 + self.address_width.bytes() + self.turnaround
    }

    /// Encode opcode, address and turnaround into the start of `buf`
    ///
    /// `buf` must be at least [`Self::header_len`] bytes long.
    pub fn encode_header(&self, buf: &mut [u8]) {
        buf[0] = self.opcode;
        let addr_len = self.address_width.bytes();
        if let Some(addr) = self.address {
            self.address_width.encode(addr, &mut buf[1..1 + addr_len]);
        }
        for byte in &mut buf[1 + addr_len..self.header_len()] {
            *byte = 0;
        }
    }

    /// Returns true if this command has a read phase
    pub fn has_read(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// Calculate the total number of bytes clocked on the bus
    pub fn total_bytes(&self) -> usize {
        self.header_len() + self.write_data.len() + self.read_buf.len()
    }
}

/// Bus master driving a memory card slot
///
/// All methods block. There is exactly one command in flight at any time;
/// the card has no command queue.
pub trait Transport {
    /// Run one chip-select framed transaction
    ///
    /// Clocks out the encoded header and `write_data`, then clocks in
    /// `read_buf.len()` bytes while keeping chip select asserted.
    fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> Result<()>;

    /// Exchange a single byte full-duplex in its own transaction
    fn exchange_byte(&mut self, byte: u8) -> Result<u8>;

    /// Whether this bus has the card's ready (INT) line wired up
    fn has_ready_line(&self) -> bool {
        false
    }

    /// Block until the ready line signals completion or `timeout` elapses
    ///
    /// Returns the time spent waiting when the line fired, `Ok(None)` on
    /// timeout. Buses without a ready line return `Ok(None)` immediately;
    /// callers poll the card status instead.
    fn wait_ready(&mut self, _timeout: Duration) -> Result<Option<Duration>> {
        Ok(None)
    }

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

// Allow trait objects so the CLI can pick a bus at runtime
impl Transport for alloc::boxed::Box<dyn Transport + Send> {
    fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> Result<()> {
        (**self).send_command(cmd)
    }

    fn exchange_byte(&mut self, byte: u8) -> Result<u8> {
        (**self).exchange_byte(byte)
    }

    fn has_ready_line(&self) -> bool {
        (**self).has_ready_line()
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Option<Duration>> {
        (**self).wait_ready(timeout)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

// Lets a session borrow a bus that the caller inspects afterwards
impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> Result<()> {
        (**self).send_command(cmd)
    }

    fn exchange_byte(&mut self, byte: u8) -> Result<u8> {
        (**self).exchange_byte(byte)
    }

    fn has_ready_line(&self) -> bool {
        (**self).has_ready_line()
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Option<Duration>> {
        (**self).wait_ready(timeout)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Helper function for implementing `Transport::send_command()`.
///
/// Most bus drivers move one contiguous transmit buffer followed by a
/// receive buffer. This builds the transmit buffer (header + write data)
/// and hands it to `transfer_fn` together with the command's read buffer.
///
/// # Example
///
/// ```ignore
/// fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> CoreResult<()> {
///     default_send(cmd, |tx, rx| {
///         self.spi_transfer(tx, rx).map_err(|_| CoreError::Bus { block: None })
///     })
/// }
/// ```
pub fn default_send<F>(cmd: &mut BusCommand<'_>, transfer_fn: F) -> Result<()>
where
    F: FnOnce(&[u8], &mut [u8]) -> Result<()>,
{
    let tx = encode_frame(cmd);
    transfer_fn(&tx, cmd.read_buf)
}

/// Encode the transmit half of a command into a new buffer
pub fn encode_frame(cmd: &BusCommand<'_>) -> Vec<u8> {
    let header_len = cmd.header_len();
    let mut tx = vec![0u8; header_len + cmd.write_data.len()];
    cmd.encode_header(&mut tx);
    tx[header_len..].copy_from_slice(cmd.write_data);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_page_frame_layout() {
        let mut buf = [0u8; 4];
        let cmd = BusCommand::read_page(0x52, 0x200, 4, &mut buf);
        let tx = encode_frame(&cmd);
        assert_eq!(tx, [0x52, 0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0]);
        assert_eq!(cmd.total_bytes(), 13);
    }

    #[test]
    fn test_erase_frame_uses_two_address_bytes() {
        let cmd = BusCommand::erase_sector(0xF1, 0x4000);
        let tx = encode_frame(&cmd);
        assert_eq!(tx, [0xF1, 0x00, 0x20]);
    }

    #[test]
    fn test_query_frame() {
        let mut status = [0u8; 1];
        let cmd = BusCommand::query(0x83, &[0x00], &mut status);
        assert!(cmd.has_read());
        assert_eq!(encode_frame(&cmd), [0x83, 0x00]);
    }
}
