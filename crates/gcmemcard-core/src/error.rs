//! Error types for gcmemcard-core
//!
//! This module provides a no_std compatible error type that is shared by
//! every layer of the crate. Errors that concern a single block carry the
//! block index so the caller can always tell which block failed.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Bus errors
    /// The card did not signal ready within the allowed time
    Timeout {
        /// Block being accessed when the timeout happened, if any
        block: Option<u32>,
    },
    /// The bus driver failed to perform a transfer
    Bus {
        /// Block being accessed when the transfer failed, if any
        block: Option<u32>,
    },

    // Identification errors
    /// Nothing answered the identify command
    NoCard,
    /// The device answered with an ID word that is not a memory card
    NotAMemoryCard {
        /// Raw identification word
        id: u32,
    },
    /// The size class or erase block size is not in the device table
    UnrecognizedDevice {
        /// Raw identification word
        id: u32,
    },
    /// The card reported a block size this crate cannot address
    UnsupportedGeometry,
    /// A block operation was attempted before the card was identified
    NotIdentified,
    /// The unlock handshake was rejected by the card
    UnlockFailed,

    // Block errors
    /// A block read failed its integrity check on every attempt
    Checksum {
        /// Index of the failing block
        block: u32,
    },
    /// The card reported an erase or program error on every attempt
    WriteRejected {
        /// Index of the failing block
        block: u32,
        /// Last status byte reported by the card
        status: u8,
    },
    /// The card reported an erase error for a whole-card erase
    EraseRejected {
        /// Status byte reported by the card
        status: u8,
    },
    /// The block index is beyond the end of the card
    BlockOutOfRange {
        /// Requested block index
        block: u32,
    },
    /// Read back data does not match what was written
    VerifyFailed {
        /// Index of the mismatching block
        block: u32,
    },
    /// The run was cancelled before this block was started
    Interrupted {
        /// Index of the first block that was not processed
        block: u32,
    },

    // Image errors
    /// An image does not have the size of the connected card
    ImageSizeMismatch {
        /// Size of the card in bytes
        expected: usize,
        /// Size of the offending image in bytes
        found: usize,
    },
}

impl Error {
    /// Attach a block index to errors raised while accessing that block
    ///
    /// Errors that already name a block, or that are not block related,
    /// are returned unchanged.
    pub fn at_block(self, index: u32) -> Self {
        match self {
            Self::Timeout { block: None } => Self::Timeout { block: Some(index) },
            Self::Bus { block: None } => Self::Bus { block: Some(index) },
            other => other,
        }
    }

    /// The block index this error refers to, if any
    pub fn block(&self) -> Option<u32> {
        match *self {
            Self::Timeout { block } | Self::Bus { block } => block,
            Self::Checksum { block }
            | Self::WriteRejected { block, .. }
            | Self::BlockOutOfRange { block }
            | Self::VerifyFailed { block }
            | Self::Interrupted { block } => Some(block),
            _ => None,
        }
    }

    /// Whether the error was raised before any device command was sent
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::ImageSizeMismatch { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { block: Some(block) } => {
                write!(f, "card did not become ready (block {})", block)
            }
            Self::Timeout { block: None } => write!(f, "card did not become ready"),
            Self::Bus { block: Some(block) } => {
                write!(f, "bus transfer failed (block {})", block)
            }
            Self::Bus { block: None } => write!(f, "bus transfer failed"),
            Self::NoCard => write!(f, "no memory card detected"),
            Self::NotAMemoryCard { id } => {
                write!(f, "device is not a memory card (id 0x{:08X})", id)
            }
            Self::UnrecognizedDevice { id } => {
                write!(f, "unrecognized memory card (id 0x{:08X})", id)
            }
            Self::UnsupportedGeometry => write!(f, "unsupported card geometry"),
            Self::NotIdentified => write!(f, "card has not been identified"),
            Self::UnlockFailed => {
                write!(f, "unlock failed, power-cycle the card before trying again")
            }
            Self::Checksum { block } => write!(f, "checksum mismatch reading block {}", block),
            Self::WriteRejected { block, status } => write!(
                f,
                "card rejected write of block {} (status 0x{:02X})",
                block, status
            ),
            Self::EraseRejected { status } => {
                write!(f, "card rejected erase (status 0x{:02X})", status)
            }
            Self::BlockOutOfRange { block } => write!(f, "block {} is beyond end of card", block),
            Self::VerifyFailed { block } => write!(f, "verify failed for block {}", block),
            Self::Interrupted { block } => write!(f, "interrupted before block {}", block),
            Self::ImageSizeMismatch { expected, found } => write!(
                f,
                "image size mismatch: card holds {} bytes, image has {} bytes",
                expected, found
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_block_fills_timeout() {
        let err = Error::Timeout { block: None }.at_block(7);
        assert_eq!(err, Error::Timeout { block: Some(7) });
        assert_eq!(err.block(), Some(7));
    }

    #[test]
    fn test_at_block_keeps_existing_index() {
        let err = Error::Checksum { block: 3 }.at_block(9);
        assert_eq!(err.block(), Some(3));
        assert_eq!(Error::NoCard.at_block(1), Error::NoCard);
    }

    #[test]
    fn test_at_block_fills_bus_error() {
        let err = Error::Bus { block: None }.at_block(5);
        assert_eq!(err, Error::Bus { block: Some(5) });
        assert_eq!(err.block(), Some(5));
        assert_eq!(err.at_block(6).block(), Some(5));
    }
}
