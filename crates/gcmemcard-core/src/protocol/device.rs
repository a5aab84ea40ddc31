//! Card command protocol
//!
//! [`DeviceProtocol`] turns the raw [`Transport`] into card operations:
//! identification, unlock, verified block reads and erase-then-program
//! block writes. Every block command runs through a small bounded state
//! machine (see [`CommandState`]); the retry bound is the only loop that
//! can repeat a command, and busy waits are bounded by a timeout.

use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use super::checksum::Integrity;
use super::geometry::{CardGeometry, DeviceProfile, Identity};
use super::opcodes::{self, CardStatus, READ_PAGE_SIZE, WRITE_PAGE_SIZE};
use super::unlock::{
    challenge_response, HandshakeCipher, CHALLENGE_LEN, CHALLENGE_READ_LEN, FLASH_ID_LEN,
    PRIMER_LEN, UNLOCK_ARRAY_ADDR,
};
use crate::error::{Error, Result};
use crate::transport::{BusCommand, Transport};

/// Default number of attempts for a block read
pub const DEFAULT_READ_ATTEMPTS: u32 = 3;
/// Default number of attempts for a block write
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;
/// Default time a program or status change may keep the card busy
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(1);
/// Default time a sector erase may keep the card busy
pub const DEFAULT_ERASE_TIMEOUT: Duration = Duration::from_secs(1);
/// Status poll interval when no ready line is available
const POLL_INTERVAL_US: u32 = 1000;

fn duration_us(d: Duration) -> u32 {
    d.as_micros().min(u32::MAX as u128) as u32
}

/// Tunables for the protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Attempts per block read before giving up with a checksum error
    pub read_attempts: u32,
    /// Attempts per block write before giving up with a write rejection
    pub write_attempts: u32,
    /// Upper bound for a program to complete
    pub ready_timeout: Duration,
    /// Upper bound for a sector erase to complete
    pub erase_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_attempts: DEFAULT_READ_ATTEMPTS,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            erase_timeout: DEFAULT_ERASE_TIMEOUT,
        }
    }
}

impl ProtocolConfig {
    /// Set the number of read attempts (at least one)
    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    /// Set the number of write attempts (at least one)
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    /// Set the program timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the erase timeout
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }
}

/// State of a block command
///
/// ```text
/// Idle -> Sent -> AwaitingReady -> Verifying -> Done
///                                            -> Retrying -> Sent
///                                            -> Failed
/// ```
///
/// Reads skip `AwaitingReady`; multi-step writes go back from `Verifying`
/// to `Sent` for the next sub-step (erase, then each program page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Nothing issued yet
    Idle,
    /// Command bytes are on the wire
    Sent,
    /// Waiting for the card to leave busy
    AwaitingReady,
    /// Checking status or checksum
    Verifying,
    /// Previous attempt failed, another one is allowed
    Retrying,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl CommandState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_enter(self, next: CommandState) -> bool {
        use CommandState::*;
        matches!(
            (self, next),
            (Idle, Sent)
                | (Sent, AwaitingReady)
                | (Sent, Verifying)
                | (Sent, Failed)
                | (AwaitingReady, Verifying)
                | (AwaitingReady, Failed)
                | (Verifying, Sent)
                | (Verifying, Done)
                | (Verifying, Retrying)
                | (Verifying, Failed)
                | (Retrying, Sent)
        )
    }

    /// Whether this is a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Done | CommandState::Failed)
    }
}

/// Tracks one block command through its states and attempts
struct CommandTracker {
    op: &'static str,
    block: u32,
    state: CommandState,
    attempt: u32,
    max_attempts: u32,
}

impl CommandTracker {
    fn new(op: &'static str, block: u32, max_attempts: u32) -> Self {
        Self {
            op,
            block,
            state: CommandState::Idle,
            attempt: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    fn enter(&mut self, next: CommandState) {
        debug_assert!(
            self.state.can_enter(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        log::trace!(
            "{} block {}: {:?} -> {:?} (attempt {}/{})",
            self.op,
            self.block,
            self.state,
            next,
            self.attempt,
            self.max_attempts
        );
        self.state = next;
    }

    /// Move to `Retrying` if attempts remain, otherwise to `Failed`
    fn retry(&mut self) -> bool {
        if self.attempt < self.max_attempts {
            self.enter(CommandState::Retrying);
            self.attempt += 1;
            true
        } else {
            self.enter(CommandState::Failed);
            false
        }
    }
}

/// Why a single write attempt did not succeed
enum AttemptError {
    /// Card reported an erase/program error; may be retried
    Rejected(CardStatus),
    /// Bus failure or timeout; ends the command
    Fatal(Error),
}

impl From<Error> for AttemptError {
    fn from(e: Error) -> Self {
        AttemptError::Fatal(e)
    }
}

/// Card protocol on top of a transport
pub struct DeviceProtocol<T: Transport> {
    transport: T,
    profile: DeviceProfile,
    config: ProtocolConfig,
    identity: Option<Identity>,
    use_ready_line: bool,
}

impl<T: Transport> DeviceProtocol<T> {
    /// Create a protocol driver for the given device generation
    pub fn new(transport: T, profile: DeviceProfile, config: ProtocolConfig) -> Self {
        Self {
            transport,
            profile,
            config,
            identity: None,
            use_ready_line: false,
        }
    }

    /// The device generation table in use
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The protocol tunables in use
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Identity of the card, once [`Self::identify`] succeeded
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether completion is signalled on the ready line (vs. status polling)
    pub fn uses_ready_line(&self) -> bool {
        self.use_ready_line
    }

    /// Access the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the underlying transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn turnaround(&self) -> usize {
        self.identity
            .map(|i| i.turnaround)
            .or_else(|| self.profile.turnaround_bytes.first().copied())
            .unwrap_or(0)
    }

    fn geometry(&self) -> Result<CardGeometry> {
        self.identity
            .map(|i| i.geometry)
            .ok_or(Error::NotIdentified)
    }

    // =========================================================================
    // Simple commands
    // =========================================================================

    /// Read the raw identification word
    pub fn read_id(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        let mut cmd = BusCommand::query(opcodes::EXI_ID, &[0x00], &mut buf);
        self.transport.send_command(&mut cmd)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Identify the card and decode its geometry from the size-class table
    pub fn identify(&mut self) -> Result<CardGeometry> {
        let id = self.read_id()?;
        log::debug!("identify: id word 0x{:08X}", id);
        let identity = self.profile.decode(id)?;
        log::debug!(
            "identify: {} ({} blocks of {} bytes, {} turnaround bytes)",
            identity.size_class.name,
            identity.geometry.block_count,
            identity.geometry.block_size,
            identity.turnaround
        );
        self.identity = Some(identity);
        Ok(identity.geometry)
    }

    /// Read the status register
    pub fn status(&mut self) -> Result<CardStatus> {
        let mut buf = [0u8; 1];
        let mut cmd = BusCommand::query(opcodes::READ_STATUS, &[0x00], &mut buf);
        self.transport.send_command(&mut cmd)?;
        Ok(CardStatus::from_bits_retain(buf[0]))
    }

    /// Read the two byte vendor identifier
    pub fn vendor_id(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        let mut cmd = BusCommand::query(opcodes::READ_ID, &[0x00], &mut buf);
        self.transport.send_command(&mut cmd)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Clear the erase and program error bits
    pub fn clear_status(&mut self) -> Result<()> {
        self.transport
            .send_command(&mut BusCommand::simple(opcodes::CLEAR_STATUS))
    }

    /// Wake the card from sleep
    pub fn wake_up(&mut self) -> Result<()> {
        self.transport
            .send_command(&mut BusCommand::simple(opcodes::WAKE_UP))
    }

    /// Put the card to sleep
    pub fn sleep(&mut self) -> Result<()> {
        self.transport.send_command(&mut BusCommand::simple(opcodes::SLEEP))
    }

    /// Enable or disable INT signalling on the card
    pub fn set_interrupt(&mut self, enable: bool) -> Result<()> {
        let args = [enable as u8, 0x00, 0x00];
        self.transport
            .send_command(&mut BusCommand::write(opcodes::SET_INTERRUPT, &args))
    }

    /// Wake the card and agree on how completion is signalled
    ///
    /// If the bus has a ready line the card is asked to drive it; a card that
    /// refuses is polled instead. Without a ready line, INT signalling is
    /// switched off. Returns the resulting status.
    pub fn prepare(&mut self) -> Result<CardStatus> {
        let mut status = self.status()?;
        if status.contains(CardStatus::SLEEP) {
            log::debug!("card is asleep, waking it up");
            self.wake_up()?;
            status = self.status()?;
        }

        if self.transport.has_ready_line() {
            if !status.contains(CardStatus::INT_EN) {
                self.set_interrupt(true)?;
                status = self.status()?;
            }
            self.use_ready_line = status.contains(CardStatus::INT_EN);
            if !self.use_ready_line {
                log::warn!("card does not support INT signalling, polling status instead");
            }
        } else {
            if status.contains(CardStatus::INT_EN) {
                self.set_interrupt(false)?;
                status = self.status()?;
            }
            self.use_ready_line = false;
        }

        Ok(status)
    }

    /// Wait until the card leaves busy, bounded by `timeout`
    ///
    /// `timeout` bounds the whole call, including a fallback to polling
    /// after a ready edge that fired while the card was still busy.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        if !self.use_ready_line {
            let polls = (duration_us(timeout) / POLL_INTERVAL_US).max(1);
            for _ in 0..polls {
                if !self.status()?.contains(CardStatus::BUSY) {
                    return Ok(());
                }
                self.transport.delay_us(POLL_INTERVAL_US);
            }
            return Err(Error::Timeout { block: None });
        }

        let waited = self
            .transport
            .wait_ready(timeout)?
            .ok_or(Error::Timeout { block: None })?;
        if !self.status()?.contains(CardStatus::BUSY) {
            return Ok(());
        }

        // Edge left over from an earlier command, poll what is left
        let remaining = timeout.saturating_sub(waited);
        log::trace!(
            "ready line fired while card still busy, polling for {:?}",
            remaining
        );
        for _ in 0..duration_us(remaining) / POLL_INTERVAL_US {
            self.transport.delay_us(POLL_INTERVAL_US);
            if !self.status()?.contains(CardStatus::BUSY) {
                return Ok(());
            }
        }
        Err(Error::Timeout { block: None })
    }

    /// Flush the card's internal write buffer
    pub fn write_buffer(&mut self) -> Result<()> {
        self.transport
            .send_command(&mut BusCommand::simple(opcodes::WRITE_BUFFER))?;
        self.wait_ready(self.config.ready_timeout)
    }

    /// Erase the whole card
    ///
    /// The card must be identified and unlocked. The busy bound is the
    /// sector erase timeout times the number of blocks.
    pub fn erase_card(&mut self) -> Result<()> {
        let geometry = self.geometry()?;
        self.clear_status()?;
        self.transport
            .send_command(&mut BusCommand::write(opcodes::ERASE_CARD, &[0x00, 0x00]))?;
        self.wait_ready(
            self.config
                .erase_timeout
                .saturating_mul(geometry.block_count.max(1)),
        )?;
        let status = self.status()?;
        if status.contains(CardStatus::ERASE_ERROR) {
            log::error!("erase card: card reported {:?}", status);
            return Err(Error::EraseRejected {
                status: status.bits(),
            });
        }
        log::debug!("erase card: done");
        Ok(())
    }

    // =========================================================================
    // Unlock
    // =========================================================================

    /// Perform the unlock handshake
    ///
    /// Returns the 12 byte flash id the card sends along with its challenge.
    pub fn unlock(&mut self) -> Result<[u8; FLASH_ID_LEN]> {
        let mut cipher = HandshakeCipher::new(UNLOCK_ARRAY_ADDR);

        let mut primer = [0u8; PRIMER_LEN];
        self.read_array((UNLOCK_ARRAY_ADDR >> 12) & 0x7FFFF, &mut primer)?;
        cipher.apply(&mut primer);
        cipher.next_bits(1);

        let mut data = [0u8; CHALLENGE_READ_LEN];
        self.read_array(0, &mut data)?;
        cipher.apply(&mut data);
        cipher.next_bits(1);

        let mut flash_id = [0u8; FLASH_ID_LEN];
        flash_id.copy_from_slice(&data[..FLASH_ID_LEN]);
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&data[FLASH_ID_LEN..FLASH_ID_LEN + CHALLENGE_LEN]);

        let response = challenge_response(&challenge).to_be_bytes();
        log::trace!("unlock: challenge {:02X?}, response {:02X?}", challenge, response);

        self.send_unlock_half(&mut cipher, &response[..2])?;
        cipher.next_bits(1);
        self.send_unlock_half(&mut cipher, &response[2..])?;

        if !self.status()?.contains(CardStatus::UNLOCKED) {
            return Err(Error::UnlockFailed);
        }
        log::debug!("unlock: card unlocked, flash id {:02X?}", flash_id);
        Ok(flash_id)
    }

    fn send_unlock_half(&mut self, cipher: &mut HandshakeCipher, half: &[u8]) -> Result<()> {
        // response half, 2 zero bytes, turnaround, 4 zero bytes; all scrambled
        let mut frame = vec![0u8; 2 + 2 + self.turnaround() + 4];
        frame[..2].copy_from_slice(half);
        cipher.apply(&mut frame);
        self.transport
            .send_command(&mut BusCommand::write(opcodes::READ_ARRAY, &frame))
    }

    // =========================================================================
    // Array access
    // =========================================================================

    /// Issue a single array read command
    fn read_array(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let turnaround = self.turnaround();
        let mut cmd = BusCommand::read_page(opcodes::READ_ARRAY, addr, turnaround, buf);
        self.transport.send_command(&mut cmd)
    }

    /// Read `buf.len()` bytes at `addr` page by page
    ///
    /// Returns false if any page failed its integrity check.
    fn read_pages(&mut self, addr: u32, buf: &mut [u8]) -> Result<bool> {
        let integrity = self.profile.integrity;
        let trailer = integrity.trailer_len();
        let mut scratch = vec![0u8; READ_PAGE_SIZE + trailer];
        let mut intact = true;

        for (i, page) in buf.chunks_mut(READ_PAGE_SIZE).enumerate() {
            let page_addr = addr + (i * READ_PAGE_SIZE) as u32;
            match integrity {
                Integrity::Trailing(checksum) => {
                    let frame = &mut scratch[..page.len() + trailer];
                    self.read_array(page_addr, frame)?;
                    let (data, sum) = frame.split_at(page.len());
                    if !checksum.verify(data, sum) {
                        log::debug!("read: checksum mismatch at 0x{:06X}", page_addr);
                        intact = false;
                    }
                    page.copy_from_slice(data);
                }
                Integrity::Reread => {
                    self.read_array(page_addr, page)?;
                    let second = &mut scratch[..page.len()];
                    self.read_array(page_addr, second)?;
                    if *page != *second {
                        log::debug!("read: reread mismatch at 0x{:06X}", page_addr);
                        intact = false;
                    }
                }
            }
        }

        Ok(intact)
    }

    /// Verified read of `buf.len()` bytes at `addr`, on behalf of `block`
    fn read_verified(&mut self, block: u32, addr: u32, buf: &mut [u8]) -> Result<()> {
        let mut tracker = CommandTracker::new("read", block, self.config.read_attempts);
        loop {
            tracker.enter(CommandState::Sent);
            let intact = match self.read_pages(addr, buf) {
                Ok(intact) => intact,
                Err(e) => {
                    tracker.enter(CommandState::Failed);
                    return Err(e.at_block(block));
                }
            };
            tracker.enter(CommandState::Verifying);
            if intact {
                tracker.enter(CommandState::Done);
                return Ok(());
            }
            if !tracker.retry() {
                log::error!("read block {}: checksum failed {} times", block, tracker.attempt);
                return Err(Error::Checksum { block });
            }
            log::warn!(
                "read block {}: checksum mismatch, retrying ({}/{})",
                block,
                tracker.attempt,
                tracker.max_attempts
            );
        }
    }

    /// Read one block, retrying on integrity failures
    pub fn read_block(&mut self, index: u32) -> Result<Vec<u8>> {
        let geometry = self.geometry()?;
        if !geometry.contains(index) {
            return Err(Error::BlockOutOfRange { block: index });
        }
        let mut buf = vec![0u8; geometry.block_size as usize];
        self.read_verified(index, geometry.block_offset(index) as u32, &mut buf)?;
        Ok(buf)
    }

    /// Read the first page of the card (the card header), verified
    pub fn read_header_page(&mut self) -> Result<[u8; READ_PAGE_SIZE]> {
        self.geometry()?;
        let mut buf = [0u8; READ_PAGE_SIZE];
        self.read_verified(0, 0, &mut buf)?;
        Ok(buf)
    }

    /// Erase and program one block
    ///
    /// A card-reported erase/program error restarts the whole erase and
    /// program sequence, up to the configured number of attempts. A timeout
    /// or bus error ends the command immediately.
    pub fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let geometry = self.geometry()?;
        if !geometry.contains(index) {
            return Err(Error::BlockOutOfRange { block: index });
        }
        if data.len() != geometry.block_size as usize {
            return Err(Error::ImageSizeMismatch {
                expected: geometry.block_size as usize,
                found: data.len(),
            });
        }

        let addr = geometry.block_offset(index) as u32;
        let mut tracker = CommandTracker::new("write", index, self.config.write_attempts);
        loop {
            tracker.enter(CommandState::Sent);
            match self.write_attempt(addr, data, &mut tracker) {
                Ok(()) => {
                    tracker.enter(CommandState::Done);
                    log::trace!("write block {}: done", index);
                    return Ok(());
                }
                Err(AttemptError::Rejected(status)) => {
                    if !tracker.retry() {
                        log::error!(
                            "write block {}: rejected {} times (status {:?})",
                            index,
                            tracker.attempt,
                            status
                        );
                        return Err(Error::WriteRejected {
                            block: index,
                            status: status.bits(),
                        });
                    }
                    log::warn!(
                        "write block {}: card reported {:?}, retrying ({}/{})",
                        index,
                        status,
                        tracker.attempt,
                        tracker.max_attempts
                    );
                }
                Err(AttemptError::Fatal(e)) => {
                    tracker.enter(CommandState::Failed);
                    return Err(e.at_block(index));
                }
            }
        }
    }

    fn write_attempt(
        &mut self,
        addr: u32,
        data: &[u8],
        tracker: &mut CommandTracker,
    ) -> core::result::Result<(), AttemptError> {
        // Erase sets the whole sector to 0xFF, programming only clears bits
        self.clear_status()?;
        self.transport
            .send_command(&mut BusCommand::erase_sector(opcodes::ERASE_SECTOR, addr))?;
        tracker.enter(CommandState::AwaitingReady);
        self.wait_ready(self.config.erase_timeout)?;
        tracker.enter(CommandState::Verifying);
        let status = self.status()?;
        if status.contains(CardStatus::ERASE_ERROR) {
            return Err(AttemptError::Rejected(status));
        }

        let integrity = self.profile.integrity;
        let trailer = integrity.trailer_len();
        let mut frame = vec![0u8; WRITE_PAGE_SIZE + trailer];

        for (i, page) in data.chunks(WRITE_PAGE_SIZE).enumerate() {
            let page_addr = addr + (i * WRITE_PAGE_SIZE) as u32;
            let frame = &mut frame[..page.len() + trailer];
            frame[..page.len()].copy_from_slice(page);
            if let Integrity::Trailing(checksum) = integrity {
                checksum.encode(checksum.compute(page), &mut frame[page.len()..]);
            }

            tracker.enter(CommandState::Sent);
            self.clear_status()?;
            self.transport.send_command(&mut BusCommand::program_page(
                opcodes::PROGRAM_PAGE,
                page_addr,
                frame,
            ))?;
            tracker.enter(CommandState::AwaitingReady);
            self.wait_ready(self.config.ready_timeout)?;
            tracker.enter(CommandState::Verifying);
            let status = self.status()?;
            if status.contains(CardStatus::PROGRAM_ERROR) {
                return Err(AttemptError::Rejected(status));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_happy_paths() {
        use CommandState::*;
        assert!(Idle.can_enter(Sent));
        assert!(Sent.can_enter(AwaitingReady));
        assert!(AwaitingReady.can_enter(Verifying));
        assert!(Verifying.can_enter(Done));
        assert!(Sent.can_enter(Verifying));
        assert!(Verifying.can_enter(Sent));
    }

    #[test]
    fn test_state_machine_retry_loop() {
        use CommandState::*;
        assert!(Verifying.can_enter(Retrying));
        assert!(Retrying.can_enter(Sent));
        assert!(!Retrying.can_enter(Done));
        assert!(!Idle.can_enter(Done));
    }

    #[test]
    fn test_terminal_states() {
        use CommandState::*;
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Done.can_enter(Sent));
        assert!(!Failed.can_enter(Retrying));
    }

    #[test]
    fn test_tracker_respects_bound() {
        let mut tracker = CommandTracker::new("read", 0, 3);
        let mut attempts = 1;
        loop {
            tracker.enter(CommandState::Sent);
            tracker.enter(CommandState::Verifying);
            if !tracker.retry() {
                break;
            }
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert_eq!(tracker.state, CommandState::Failed);
    }

    #[test]
    fn test_config_builder_clamps_attempts() {
        let config = ProtocolConfig::default()
            .with_read_attempts(0)
            .with_write_attempts(5)
            .with_ready_timeout(Duration::from_millis(50));
        assert_eq!(config.read_attempts, 1);
        assert_eq!(config.write_attempts, 5);
        assert_eq!(config.ready_timeout, Duration::from_millis(50));
        assert_eq!(config.erase_timeout, DEFAULT_ERASE_TIMEOUT);
    }
}
