//! An opened memory card
//!
//! [`CardSession`] owns the protocol driver (and through it the bus) for the
//! lifetime of one read or write run. It performs the open sequence, then
//! offers whole-image reads and block writes in ascending block order.
//!
//! Cancellation is cooperative: if a cancel flag is attached, it is checked
//! before every block and a set flag ends the run with
//! [`Error::Interrupted`]. A block that is already on the wire always
//! completes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::diff::BlockDiff;
use crate::error::{Error, Result};
use crate::header::CardHeader;
use crate::image::Image;
use crate::protocol::opcodes::{READ_PAGE_SIZE, WRITE_PAGE_SIZE};
use crate::protocol::unlock::FLASH_ID_LEN;
use crate::protocol::{
    CardGeometry, CardStatus, DeviceProfile, DeviceProtocol, Identity, ProtocolConfig, GAMECUBE,
};
use crate::sync::SyncProgress;
use crate::transport::Transport;

/// A card that has been (or is about to be) opened for block access
pub struct CardSession<T: Transport> {
    protocol: DeviceProtocol<T>,
    geometry: Option<CardGeometry>,
    opened: bool,
    flash_id: Option<[u8; FLASH_ID_LEN]>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<T: Transport> CardSession<T> {
    /// Create a session for a GameCube card with default protocol settings
    pub fn new(transport: T) -> Self {
        Self::with_protocol(DeviceProtocol::new(
            transport,
            GAMECUBE,
            ProtocolConfig::default(),
        ))
    }

    /// Create a session for a GameCube card with custom protocol settings
    pub fn with_config(transport: T, config: ProtocolConfig) -> Self {
        Self::with_protocol(DeviceProtocol::new(transport, GAMECUBE, config))
    }

    /// Create a session for another device generation
    pub fn with_profile(transport: T, profile: DeviceProfile, config: ProtocolConfig) -> Self {
        Self::with_protocol(DeviceProtocol::new(transport, profile, config))
    }

    /// Create a session around an existing protocol driver
    pub fn with_protocol(protocol: DeviceProtocol<T>) -> Self {
        Self {
            protocol,
            geometry: None,
            opened: false,
            flash_id: None,
            cancel: None,
        }
    }

    /// Attach a cancel flag, checked before every block
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Identify the card and validate its geometry
    ///
    /// This only reads the identification word, so it is safe to use for
    /// pre-flight checks before anything is sent that changes card state.
    pub fn identify(&mut self) -> Result<CardGeometry> {
        if let Some(geometry) = self.geometry {
            return Ok(geometry);
        }
        let geometry = self.protocol.identify()?;
        check_geometry(&geometry)?;
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Open the card
    ///
    /// Identifies the card, wakes it if needed, negotiates how completion is
    /// signalled and unlocks it if it is still locked. The geometry always
    /// comes from the card.
    pub fn open(&mut self) -> Result<CardGeometry> {
        let geometry = self.identify()?;
        if self.opened {
            return Ok(geometry);
        }

        let status = self.protocol.prepare()?;
        log::debug!("open: status {:?}", status);
        if status.contains(CardStatus::UNLOCKED) {
            log::debug!("open: card already unlocked");
        } else {
            self.flash_id = Some(self.protocol.unlock()?);
        }

        if let Some(identity) = self.protocol.identity() {
            log::info!(
                "Found {} ({} blocks of {} KiB)",
                identity.size_class.name,
                geometry.block_count,
                geometry.block_size / 1024
            );
        }
        self.opened = true;
        Ok(geometry)
    }

    /// Geometry of the identified card
    pub fn geometry(&self) -> Option<&CardGeometry> {
        self.geometry.as_ref()
    }

    /// Full identity of the opened card
    pub fn identity(&self) -> Option<&Identity> {
        self.protocol.identity()
    }

    /// Flash id received during unlock (None if the card was already unlocked)
    pub fn flash_id(&self) -> Option<&[u8; FLASH_ID_LEN]> {
        self.flash_id.as_ref()
    }

    /// Whether completion is signalled on the ready line
    pub fn uses_ready_line(&self) -> bool {
        self.protocol.uses_ready_line()
    }

    /// Read the status register
    pub fn status(&mut self) -> Result<CardStatus> {
        self.protocol.status()
    }

    /// Read the vendor identifier
    pub fn vendor_id(&mut self) -> Result<u16> {
        self.protocol.vendor_id()
    }

    /// Read and decode the card header (first page of block 0)
    pub fn read_header(&mut self) -> Result<CardHeader> {
        let page = self.protocol.read_header_page()?;
        Ok(CardHeader::parse(&page))
    }

    /// Access the protocol driver
    pub fn protocol_mut(&mut self) -> &mut DeviceProtocol<T> {
        &mut self.protocol
    }

    fn open_geometry(&self) -> Result<CardGeometry> {
        match self.geometry {
            Some(geometry) if self.opened => Ok(geometry),
            _ => Err(Error::NotIdentified),
        }
    }

    fn check_cancelled(&self, block: u32) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                log::warn!("cancelled before block {}", block);
                Err(Error::Interrupted { block })
            }
            _ => Ok(()),
        }
    }

    /// Read the whole card in ascending block order
    pub fn read_image<P: SyncProgress + ?Sized>(&mut self, progress: &mut P) -> Result<Image> {
        let geometry = self.open_geometry()?;
        let mut data = Vec::with_capacity(geometry.capacity());

        progress.reading(geometry.block_count as usize);
        for index in 0..geometry.block_count {
            self.check_cancelled(index)?;
            let block = self.protocol.read_block(index)?;
            data.extend_from_slice(&block);
            progress.read_progress(index as usize + 1);
        }

        Image::new(data, geometry)
    }

    /// Write the blocks named by `diff` from `image`, in ascending order
    ///
    /// Stops at the first failing block. Blocks written before the failure
    /// keep their new contents. Returns the number of blocks written.
    pub fn write_blocks<P: SyncProgress + ?Sized>(
        &mut self,
        diff: &BlockDiff,
        image: &Image,
        progress: &mut P,
    ) -> Result<usize> {
        self.check_image(image)?;

        let mut written = 0;
        progress.writing(diff.len());
        for index in diff.iter() {
            self.check_cancelled(index)?;
            let data = image
                .block(index)
                .ok_or(Error::BlockOutOfRange { block: index })?;
            log::debug!("writing block {}", index);
            self.protocol.write_block(index, data)?;
            written += 1;
            progress.write_progress(written);
        }

        Ok(written)
    }

    /// Read back the blocks named by `diff` and compare them with `image`
    pub fn verify_blocks<P: SyncProgress + ?Sized>(
        &mut self,
        diff: &BlockDiff,
        image: &Image,
        progress: &mut P,
    ) -> Result<()> {
        self.check_image(image)?;

        progress.verifying(diff.len());
        for (done, index) in diff.iter().enumerate() {
            self.check_cancelled(index)?;
            let expected = image
                .block(index)
                .ok_or(Error::BlockOutOfRange { block: index })?;
            if self.protocol.read_block(index)? != expected {
                log::error!("verify: block {} does not match", index);
                return Err(Error::VerifyFailed { block: index });
            }
            progress.verify_progress(done + 1);
        }

        Ok(())
    }

    fn check_image(&self, image: &Image) -> Result<()> {
        let geometry = self.open_geometry()?;
        let ig = image.geometry();
        if ig.block_size != geometry.block_size || ig.block_count != geometry.block_count {
            return Err(Error::ImageSizeMismatch {
                expected: geometry.capacity(),
                found: image.as_bytes().len(),
            });
        }
        Ok(())
    }

    /// Put the card to sleep and give back the transport
    pub fn close(mut self) -> Result<T> {
        if self.opened {
            self.protocol.sleep()?;
            log::debug!("card put to sleep");
        }
        Ok(self.protocol.into_transport())
    }
}

/// Blocks must be a whole number of read and program pages
fn check_geometry(geometry: &CardGeometry) -> Result<()> {
    let size = geometry.block_size as usize;
    if size == 0
        || !size.is_power_of_two()
        || size % READ_PAGE_SIZE != 0
        || size % WRITE_PAGE_SIZE != 0
        || geometry.block_count == 0
    {
        log::error!("unsupported block size {} bytes", size);
        return Err(Error::UnsupportedGeometry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(block_size: u32) -> CardGeometry {
        CardGeometry {
            block_size,
            block_count: 4,
            uid: 0,
        }
    }

    #[test]
    fn test_check_geometry() {
        assert!(check_geometry(&geometry(0x2000)).is_ok());
        assert!(check_geometry(&geometry(0x40000)).is_ok());
        assert_eq!(
            check_geometry(&geometry(0x100)),
            Err(Error::UnsupportedGeometry)
        );
        assert_eq!(
            check_geometry(&geometry(0x3000)),
            Err(Error::UnsupportedGeometry)
        );
        assert_eq!(check_geometry(&geometry(0)), Err(Error::UnsupportedGeometry));
    }
}
