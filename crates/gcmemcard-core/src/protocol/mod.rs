//! GameCube memory card protocol
//!
//! - [`opcodes`] - command bytes and the status register
//! - [`address`] - the card's address encoding
//! - [`geometry`] - identification word decoding and the size-class table
//! - [`checksum`] - payload integrity checks
//! - [`unlock`] - unlock handshake cipher and challenge hash
//! - [`device`] - the command state machine built on a [`crate::transport::Transport`]

pub mod address;
pub mod checksum;
pub mod device;
pub mod geometry;
pub mod opcodes;
pub mod unlock;

pub use checksum::{Checksum, Integrity};
pub use device::{CommandState, DeviceProtocol, ProtocolConfig};
pub use geometry::{CardGeometry, DeviceProfile, Identity, SizeClass, GAMECUBE};
pub use opcodes::CardStatus;
