//! GameCube memory card command opcodes
//!
//! The card speaks a small command set over its EXI (SPI mode 0) port.
//! Status-changing commands (erase, program) keep the card busy; completion
//! is signalled on the INT line or by the BUSY bit of the status register.

use bitflags::bitflags;

// ============================================================================
// Identification and status
// ============================================================================

/// Read the EXI identification word (followed by one zero byte, 4 byte response)
pub const EXI_ID: u8 = 0x00;
/// Read the status register (followed by one zero byte, 1 byte response)
pub const READ_STATUS: u8 = 0x83;
/// Read the vendor identifier (followed by one zero byte, 2 byte response)
pub const READ_ID: u8 = 0x85;
/// Clear PROGRAM_ERROR and ERASE_ERROR
pub const CLEAR_STATUS: u8 = 0x89;

// ============================================================================
// Power and signalling
// ============================================================================

/// Enable/disable INT signalling (`81 en 00 00`)
pub const SET_INTERRUPT: u8 = 0x81;
/// Flush the card's internal write buffer
pub const WRITE_BUFFER: u8 = 0x82;
/// Wake the card from sleep
pub const WAKE_UP: u8 = 0x87;
/// Put the card to sleep
pub const SLEEP: u8 = 0x88;

// ============================================================================
// Array access
// ============================================================================

/// Read from the flash array (4 address bytes + turnaround)
pub const READ_ARRAY: u8 = 0x52;
/// Erase one sector (2 address bytes)
pub const ERASE_SECTOR: u8 = 0xF1;
/// Program up to one write page (4 address bytes + data)
pub const PROGRAM_PAGE: u8 = 0xF2;
/// Erase the whole card (`F4 00 00`)
pub const ERASE_CARD: u8 = 0xF4;

// ============================================================================
// Transfer sizes
// ============================================================================

/// Largest single array read
pub const READ_PAGE_SIZE: usize = 0x200;
/// Largest single program command payload
pub const WRITE_PAGE_SIZE: usize = 0x80;

bitflags! {
    /// Card status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CardStatus: u8 {
        /// Card is ready for array access
        const READY         = 1 << 0;
        /// INT signalling is enabled
        const INT_EN        = 1 << 1;
        /// Last program command failed
        const PROGRAM_ERROR = 1 << 3;
        /// Last erase command failed
        const ERASE_ERROR   = 1 << 4;
        /// Card is in sleep mode
        const SLEEP         = 1 << 5;
        /// Unlock handshake has completed
        const UNLOCKED      = 1 << 6;
        /// An erase or program is still running
        const BUSY          = 1 << 7;

        /// Either error bit
        const ERROR = Self::PROGRAM_ERROR.bits() | Self::ERASE_ERROR.bits();

        // Bit 2 is undocumented but reported by some cards
        const _ = !0;
    }
}
