//! gcmemcard-core - Core library for GameCube memory card access
//!
//! This crate implements everything needed to dump and rewrite a GameCube
//! memory card that is wired to a host SPI controller, independent of the
//! actual bus driver:
//!
//! - [`transport`] - the bus abstraction a driver implements
//! - [`protocol`] - the card command set, unlock handshake and retry logic
//! - [`session`] - whole-image reads and block writes on an opened card
//! - [`diff`] - the block-level comparison of two images
//! - [`sync`] - the read and write flows used by the CLI
//!
//! It is `no_std` (with `alloc`) so it can run on a microcontroller acting
//! as a bus bridge as well as on a Linux single-board computer.
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for [`Error`]
//!
//! # Example
//!
//! ```ignore
//! use gcmemcard_core::session::CardSession;
//! use gcmemcard_core::sync::{self, NoProgress};
//!
//! fn dump<T: gcmemcard_core::transport::Transport>(bus: T) -> gcmemcard_core::Result<Vec<u8>> {
//!     let mut session = CardSession::new(bus);
//!     let image = sync::read_card(&mut session, &mut NoProgress)?;
//!     Ok(image.into_bytes())
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod diff;
pub mod error;
pub mod header;
pub mod image;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};
pub use image::Image;
pub use protocol::CardGeometry;
