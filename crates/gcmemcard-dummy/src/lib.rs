//! gcmemcard-dummy - Emulated GameCube memory card for testing
//!
//! This crate provides a [`Transport`] that emulates a memory card in
//! memory, down to the wire format: commands are re-encoded into the bytes
//! a real card would see and decoded from there. It also emulates the lock
//! state and the unlock handshake, the status register and the busy time of
//! erase and program commands.
//!
//! Faults can be injected per block to exercise the retry paths:
//! corrupted reads, rejected erases and erases that never finish.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use gcmemcard_core::error::{Error, Result};
use gcmemcard_core::protocol::address;
use gcmemcard_core::protocol::geometry::encode_id;
use gcmemcard_core::protocol::opcodes::{self, CardStatus, READ_PAGE_SIZE, WRITE_PAGE_SIZE};
use gcmemcard_core::protocol::unlock::{
    challenge_response, HandshakeCipher, CHALLENGE_LEN, CHALLENGE_READ_LEN, FLASH_ID_LEN,
    PRIMER_LEN, UNLOCK_ARRAY_ADDR,
};
use gcmemcard_core::protocol::{CardGeometry, Integrity, GAMECUBE};
use gcmemcard_core::transport::{encode_frame, BusCommand, Transport};

/// Address of the first handshake read
const PRIMER_ADDR: u32 = (UNLOCK_ARRAY_ADDR >> 12) & 0x7FFFF;

/// Configuration for the emulated card
#[derive(Debug, Clone)]
pub struct DummyCardConfig {
    /// Size field of the identification word (units of 512 KiB)
    pub size_code: u8,
    /// Latency field of the identification word
    pub latency_index: u8,
    /// Sector size field of the identification word
    pub sector_index: u8,
    /// Identification word to report instead of the one built from the fields
    pub id_override: Option<u32>,
    /// Vendor identifier
    pub vendor_id: u16,
    /// Flash id sent during the unlock handshake
    pub flash_id: [u8; FLASH_ID_LEN],
    /// Challenge sent during the unlock handshake
    pub challenge: [u8; CHALLENGE_LEN],
    /// Card starts locked
    pub locked: bool,
    /// Card starts asleep
    pub asleep: bool,
    /// The bus has the INT line wired up
    pub ready_line: bool,
    /// The card honours the set-interrupt command
    pub int_capable: bool,
    /// Status reads that still report BUSY after an erase or program
    pub busy_polls: u32,
    /// Integrity scheme the card speaks
    pub integrity: Integrity,
}

impl Default for DummyCardConfig {
    fn default() -> Self {
        Self {
            size_code: 1, // Memory Card 59
            latency_index: 0,
            sector_index: 0,
            id_override: None,
            vendor_id: 0xC221,
            flash_id: *b"DUMMY-CARD-1",
            challenge: [0x13, 0x37, 0xC0, 0xDE, 0x5A, 0xA5, 0x0F, 0xF0],
            locked: true,
            asleep: false,
            ready_line: false,
            int_capable: true,
            busy_polls: 2,
            integrity: GAMECUBE.integrity,
        }
    }
}

impl DummyCardConfig {
    /// Set the capacity in megabits (a multiple of 4)
    pub fn with_megabits(mut self, megabits: u16) -> Self {
        self.size_code = (megabits / 4) as u8;
        self
    }

    /// Set the erase sector size index
    pub fn with_sector_index(mut self, index: u8) -> Self {
        self.sector_index = index;
        self
    }

    /// Set the latency (turnaround) index
    pub fn with_latency_index(mut self, index: u8) -> Self {
        self.latency_index = index;
        self
    }

    /// Report this identification word
    pub fn with_id(mut self, id: u32) -> Self {
        self.id_override = Some(id);
        self
    }

    /// Wire up the INT line
    pub fn with_ready_line(mut self, ready_line: bool) -> Self {
        self.ready_line = ready_line;
        self
    }

    /// Use another integrity scheme
    pub fn with_integrity(mut self, integrity: Integrity) -> Self {
        self.integrity = integrity;
        self
    }

    /// Start unlocked
    pub fn unlocked(mut self) -> Self {
        self.locked = false;
        self
    }

    /// Start asleep
    pub fn asleep(mut self) -> Self {
        self.asleep = true;
        self
    }

    /// Identification word reported by the card
    pub fn id(&self) -> u32 {
        self.id_override
            .unwrap_or_else(|| encode_id(self.size_code, self.latency_index, self.sector_index))
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.size_code as usize * 512 * 1024
    }

    /// Erase sector size in bytes
    pub fn sector_size(&self) -> usize {
        GAMECUBE
            .sector_sizes
            .get(self.sector_index as usize)
            .copied()
            .unwrap_or(0x2000) as usize
    }

    /// Turnaround bytes the card expects on array reads
    pub fn turnaround(&self) -> usize {
        GAMECUBE
            .turnaround_bytes
            .get(self.latency_index as usize)
            .copied()
            .unwrap_or(4)
    }

    /// Geometry the card reports
    pub fn geometry(&self) -> CardGeometry {
        let block_size = self.sector_size() as u32;
        CardGeometry {
            block_size,
            block_count: (self.capacity() / block_size as usize) as u32,
            uid: self.id(),
        }
    }
}

/// What the card has been asked to do so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Opcode of every command, in order
    pub opcodes: Vec<u8>,
    /// Array read commands (handshake reads included)
    pub reads: usize,
    /// Block index of every sector erase, in order
    pub erased_blocks: Vec<u32>,
    /// Page program commands
    pub programs: usize,
    /// Bytes programmed
    pub bytes_programmed: usize,
    /// Emulated time spent waiting, in delays and on the INT line
    pub waited_us: u64,
}

impl DummyStats {
    /// Number of commands that change the array (erase and program)
    pub fn array_writes(&self) -> usize {
        self.erased_blocks.len() + self.programs
    }
}

/// Unlock handshake progress
enum Handshake {
    Idle,
    Primed(HandshakeCipher),
    Challenged {
        cipher: HandshakeCipher,
        expected: [u8; 4],
    },
    HalfAnswered {
        cipher: HandshakeCipher,
        expected: [u8; 4],
        first_ok: bool,
    },
}

/// Injected faults, keyed by block index
#[derive(Default)]
struct Faults {
    /// Remaining corrupted array reads per block
    corrupt_reads: BTreeMap<u32, u32>,
    /// Remaining rejected erases per block
    reject_erases: BTreeMap<u32, u32>,
    /// Blocks whose erase never completes
    hang_on_erase: BTreeSet<u32>,
    /// Next INT edges fire after this long without the card leaving busy
    stale_edges: Vec<Duration>,
    /// Corrupted reads served so far
    corrupted: u32,
}

/// Take one from a per-block fault counter
fn take_fault(map: &mut BTreeMap<u32, u32>, block: u32) -> bool {
    match map.get_mut(&block) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

/// Emulated memory card
pub struct DummyCard {
    config: DummyCardConfig,
    data: Vec<u8>,
    status: CardStatus,
    busy_left: u32,
    stuck_busy: bool,
    handshake: Handshake,
    faults: Faults,
    stats: DummyStats,
}

impl DummyCard {
    /// Create an erased card
    pub fn new(config: DummyCardConfig) -> Self {
        let data = vec![0xFF; config.capacity()];
        let mut status = CardStatus::READY;
        if !config.locked {
            status |= CardStatus::UNLOCKED;
        }
        if config.asleep {
            status |= CardStatus::SLEEP;
        }
        Self {
            config,
            data,
            status,
            busy_left: 0,
            stuck_busy: false,
            handshake: Handshake::Idle,
            faults: Faults::default(),
            stats: DummyStats::default(),
        }
    }

    /// Create an erased Memory Card 59
    pub fn new_default() -> Self {
        Self::new(DummyCardConfig::default())
    }

    /// Create a card holding `initial_data` (truncated or 0xFF padded)
    pub fn with_data(config: DummyCardConfig, initial_data: &[u8]) -> Self {
        let mut card = Self::new(config);
        let len = core::cmp::min(initial_data.len(), card.data.len());
        card.data[..len].copy_from_slice(&initial_data[..len]);
        card
    }

    /// Card contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable card contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The configuration
    pub fn config(&self) -> &DummyCardConfig {
        &self.config
    }

    /// Current status register
    pub fn status(&self) -> CardStatus {
        self.status
    }

    /// Command statistics
    pub fn stats(&self) -> &DummyStats {
        &self.stats
    }

    /// Forget all recorded commands
    pub fn reset_stats(&mut self) {
        self.stats = DummyStats::default();
    }

    /// Corrupt the next `count` array reads that touch `block`
    pub fn corrupt_reads(&mut self, block: u32, count: u32) {
        self.faults.corrupt_reads.insert(block, count);
    }

    /// Report an erase error for the next `count` erases of `block`
    pub fn reject_erases(&mut self, block: u32, count: u32) {
        self.faults.reject_erases.insert(block, count);
    }

    /// Never finish an erase of `block`
    pub fn hang_on_erase(&mut self, block: u32) {
        self.faults.hang_on_erase.insert(block);
    }

    /// Fire the next INT edge after `after` while the card stays busy
    pub fn stale_ready_edge(&mut self, after: Duration) {
        self.faults.stale_edges.push(after);
    }

    fn block_of(&self, addr: usize) -> u32 {
        (addr / self.config.sector_size()) as u32
    }

    fn start_busy(&mut self) {
        self.status |= CardStatus::BUSY;
        self.status.remove(CardStatus::READY);
        self.busy_left = self.config.busy_polls;
    }

    fn finish_busy(&mut self) {
        self.status.remove(CardStatus::BUSY);
        self.status |= CardStatus::READY;
        self.busy_left = 0;
    }

    fn read_status(&mut self) -> CardStatus {
        if self.status.contains(CardStatus::BUSY) && !self.stuck_busy {
            if self.busy_left == 0 {
                self.finish_busy();
            } else {
                self.busy_left -= 1;
            }
        }
        self.status
    }

    fn is_usable(&self) -> bool {
        !self.status.contains(CardStatus::SLEEP)
    }

    fn handle_read(&mut self, frame: &[u8], buf: &mut [u8]) -> Result<()> {
        let turnaround = self.config.turnaround();
        if frame.len() != 5 + turnaround {
            log::warn!(
                "dummy: read frame of {} bytes, expected {}",
                frame.len(),
                5 + turnaround
            );
            return Err(Error::Bus { block: None });
        }
        let addr = address::decode([frame[1], frame[2], frame[3], frame[4]]);
        self.stats.reads += 1;

        if !self.is_usable() {
            buf.fill(0xFF);
            return Ok(());
        }
        if !self.status.contains(CardStatus::UNLOCKED) {
            self.handshake_read(addr, buf);
            return Ok(());
        }

        let trailer = self.config.integrity.trailer_len();
        if buf.len() > READ_PAGE_SIZE + trailer || buf.len() < trailer {
            log::warn!("dummy: read of {} bytes", buf.len());
            return Err(Error::Bus { block: None });
        }
        let len = buf.len() - trailer;
        let start = addr as usize;
        if start + len > self.data.len() {
            log::warn!("dummy: read past end of card at 0x{:06X}", addr);
            return Err(Error::Bus { block: None });
        }

        let (payload, sum) = buf.split_at_mut(len);
        payload.copy_from_slice(&self.data[start..start + len]);
        if let Integrity::Trailing(checksum) = self.config.integrity {
            checksum.encode(checksum.compute(payload), sum);
        }

        let block = self.block_of(start);
        if len > 0 && take_fault(&mut self.faults.corrupt_reads, block) {
            // Differs from the real data and from every other corrupted read
            self.faults.corrupted += 1;
            payload[0] = payload[0].wrapping_add(self.faults.corrupted as u8);
            log::debug!("dummy: corrupted read of block {}", block);
        }
        Ok(())
    }

    fn handshake_read(&mut self, addr: u32, buf: &mut [u8]) {
        let state = core::mem::replace(&mut self.handshake, Handshake::Idle);
        match state {
            Handshake::Idle if addr == PRIMER_ADDR && buf.len() == PRIMER_LEN => {
                let mut cipher = HandshakeCipher::new(UNLOCK_ARRAY_ADDR);
                buf.fill(0);
                cipher.apply(buf);
                cipher.next_bits(1);
                self.handshake = Handshake::Primed(cipher);
            }
            Handshake::Primed(mut cipher) if addr == 0 && buf.len() == CHALLENGE_READ_LEN => {
                buf.fill(0);
                buf[..FLASH_ID_LEN].copy_from_slice(&self.config.flash_id);
                buf[FLASH_ID_LEN..FLASH_ID_LEN + CHALLENGE_LEN]
                    .copy_from_slice(&self.config.challenge);
                cipher.apply(buf);
                cipher.next_bits(1);
                self.handshake = Handshake::Challenged {
                    cipher,
                    expected: challenge_response(&self.config.challenge).to_be_bytes(),
                };
            }
            _ => {
                log::debug!("dummy: read at 0x{:06X} while locked", addr);
                buf.fill(0);
            }
        }
    }

    fn handle_unlock_half(&mut self, frame: &[u8]) {
        let expected_len = 1 + 2 + 2 + self.config.turnaround() + 4;
        let mut answer = frame[1..].to_vec();
        let state = core::mem::replace(&mut self.handshake, Handshake::Idle);
        match state {
            Handshake::Challenged {
                mut cipher,
                expected,
            } if frame.len() == expected_len => {
                cipher.apply(&mut answer);
                cipher.next_bits(1);
                self.handshake = Handshake::HalfAnswered {
                    cipher,
                    expected,
                    first_ok: answer[..2] == expected[..2],
                };
            }
            Handshake::HalfAnswered {
                mut cipher,
                expected,
                first_ok,
            } if frame.len() == expected_len => {
                cipher.apply(&mut answer);
                if first_ok && answer[..2] == expected[2..] {
                    log::debug!("dummy: unlocked");
                    self.status |= CardStatus::UNLOCKED;
                } else {
                    log::debug!("dummy: wrong unlock response");
                }
            }
            _ => log::debug!("dummy: unexpected unlock frame"),
        }
    }

    fn handle_erase(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != 3 {
            return Err(Error::Bus { block: None });
        }
        let addr = address::decode([frame[1], frame[2], 0, 0]) as usize;
        let sector = self.config.sector_size();
        let block = self.block_of(addr);
        self.stats.erased_blocks.push(block);

        self.start_busy();
        if !self.is_usable() || !self.status.contains(CardStatus::UNLOCKED) {
            self.status |= CardStatus::ERASE_ERROR;
            return Ok(());
        }
        if addr % sector != 0 || addr + sector > self.data.len() {
            log::warn!("dummy: bad erase address 0x{:06X}", addr);
            self.status |= CardStatus::ERASE_ERROR;
            return Ok(());
        }
        if self.faults.hang_on_erase.contains(&block) {
            log::debug!("dummy: erase of block {} hangs", block);
            self.stuck_busy = true;
            return Ok(());
        }
        if take_fault(&mut self.faults.reject_erases, block) {
            log::debug!("dummy: rejecting erase of block {}", block);
            self.status |= CardStatus::ERASE_ERROR;
            return Ok(());
        }

        self.data[addr..addr + sector].fill(0xFF);
        Ok(())
    }

    fn handle_program(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() < 5 {
            return Err(Error::Bus { block: None });
        }
        let addr = address::decode([frame[1], frame[2], frame[3], frame[4]]) as usize;
        let trailer = self.config.integrity.trailer_len();
        let body = &frame[5..];
        self.stats.programs += 1;

        self.start_busy();
        if !self.is_usable()
            || !self.status.contains(CardStatus::UNLOCKED)
            || body.len() < trailer
            || body.len() - trailer > WRITE_PAGE_SIZE
        {
            self.status |= CardStatus::PROGRAM_ERROR;
            return Ok(());
        }

        let (payload, sum) = body.split_at(body.len() - trailer);
        if let Integrity::Trailing(checksum) = self.config.integrity {
            if !checksum.verify(payload, sum) {
                log::debug!("dummy: program checksum mismatch at 0x{:06X}", addr);
                self.status |= CardStatus::PROGRAM_ERROR;
                return Ok(());
            }
        }
        if addr % WRITE_PAGE_SIZE != 0 || addr + payload.len() > self.data.len() {
            self.status |= CardStatus::PROGRAM_ERROR;
            return Ok(());
        }

        // Programming can only clear bits
        for (cell, &byte) in self.data[addr..addr + payload.len()].iter_mut().zip(payload) {
            *cell &= byte;
        }
        self.stats.bytes_programmed += payload.len();
        Ok(())
    }
}

impl Transport for DummyCard {
    fn send_command(&mut self, cmd: &mut BusCommand<'_>) -> Result<()> {
        let frame = encode_frame(cmd);
        let opcode = frame[0];
        self.stats.opcodes.push(opcode);

        match opcode {
            opcodes::EXI_ID => {
                let id = self.config.id().to_be_bytes();
                for (dst, src) in cmd.read_buf.iter_mut().zip(id) {
                    *dst = src;
                }
                Ok(())
            }
            opcodes::READ_STATUS => {
                let status = self.read_status();
                if let Some(b) = cmd.read_buf.first_mut() {
                    *b = status.bits();
                }
                Ok(())
            }
            opcodes::READ_ID => {
                let id = self.config.vendor_id.to_be_bytes();
                for (dst, src) in cmd.read_buf.iter_mut().zip(id) {
                    *dst = src;
                }
                Ok(())
            }
            opcodes::CLEAR_STATUS => {
                self.status
                    .remove(CardStatus::PROGRAM_ERROR | CardStatus::ERASE_ERROR);
                Ok(())
            }
            opcodes::SET_INTERRUPT => {
                let enable = frame.get(1).copied().unwrap_or(0) != 0;
                if self.config.int_capable {
                    self.status.set(CardStatus::INT_EN, enable);
                }
                Ok(())
            }
            opcodes::WAKE_UP => {
                self.status.remove(CardStatus::SLEEP);
                Ok(())
            }
            opcodes::SLEEP => {
                self.status |= CardStatus::SLEEP;
                Ok(())
            }
            // Programs land in the array directly, nothing is buffered
            opcodes::WRITE_BUFFER => Ok(()),
            opcodes::READ_ARRAY if cmd.has_read() => self.handle_read(&frame, cmd.read_buf),
            opcodes::READ_ARRAY => {
                self.handle_unlock_half(&frame);
                Ok(())
            }
            opcodes::ERASE_SECTOR => self.handle_erase(&frame),
            opcodes::PROGRAM_PAGE => self.handle_program(&frame),
            opcodes::ERASE_CARD => {
                self.start_busy();
                if self.is_usable() && self.status.contains(CardStatus::UNLOCKED) {
                    self.data.fill(0xFF);
                } else {
                    self.status |= CardStatus::ERASE_ERROR;
                }
                Ok(())
            }
            _ => {
                log::warn!("dummy: unsupported opcode 0x{:02X}", opcode);
                Err(Error::Bus { block: None })
            }
        }
    }

    fn exchange_byte(&mut self, _byte: u8) -> Result<u8> {
        // The card only drives the data line inside a command
        Ok(0xFF)
    }

    fn has_ready_line(&self) -> bool {
        self.config.ready_line
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<Option<Duration>> {
        if !self.config.ready_line || !self.status.contains(CardStatus::INT_EN) {
            return Ok(None);
        }
        if !self.faults.stale_edges.is_empty() {
            let after = self.faults.stale_edges.remove(0).min(timeout);
            self.stats.waited_us += after.as_micros() as u64;
            return Ok(Some(after));
        }
        if self.stuck_busy {
            self.stats.waited_us += timeout.as_micros() as u64;
            return Ok(None);
        }
        self.finish_busy();
        Ok(Some(Duration::ZERO))
    }

    fn delay_us(&mut self, us: u32) {
        // Only accounted, in-memory operations need no real delay
        self.stats.waited_us += us as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcmemcard_core::protocol::{DeviceProtocol, ProtocolConfig};

    fn protocol(card: &mut DummyCard) -> DeviceProtocol<&mut DummyCard> {
        DeviceProtocol::new(card, GAMECUBE, ProtocolConfig::default())
    }

    #[test]
    fn test_identify() {
        let mut card = DummyCard::new_default();
        let geometry = protocol(&mut card).identify().unwrap();
        assert_eq!(geometry.block_size, 0x2000);
        assert_eq!(geometry.block_count, 64);
    }

    #[test]
    fn test_identify_errors() {
        let mut empty = DummyCard::new(DummyCardConfig::default().with_id(0));
        assert_eq!(protocol(&mut empty).identify(), Err(Error::NoCard));

        let mut odd = DummyCard::new(DummyCardConfig::default().with_megabits(12));
        let id = odd.config().id();
        assert_eq!(
            protocol(&mut odd).identify(),
            Err(Error::UnrecognizedDevice { id })
        );
    }

    #[test]
    fn test_unlock_handshake() {
        let mut card = DummyCard::new_default();
        let mut proto = protocol(&mut card);
        proto.identify().unwrap();
        let flash_id = proto.unlock().unwrap();
        assert_eq!(&flash_id, b"DUMMY-CARD-1");
        assert!(card.status().contains(CardStatus::UNLOCKED));
    }

    #[test]
    fn test_unlock_with_long_turnaround() {
        let mut card = DummyCard::new(DummyCardConfig::default().with_latency_index(5));
        let mut proto = protocol(&mut card);
        proto.identify().unwrap();
        assert!(proto.unlock().is_ok());
    }

    #[test]
    fn test_locked_card_rejects_erase() {
        let mut card = DummyCard::new_default();
        let mut proto = protocol(&mut card);
        proto.identify().unwrap();
        let err = proto.write_block(0, &[0u8; 0x2000]).unwrap_err();
        assert!(matches!(err, Error::WriteRejected { block: 0, .. }));
    }

    #[test]
    fn test_prepare_wakes_card() {
        let mut card = DummyCard::new(DummyCardConfig::default().asleep());
        let status = protocol(&mut card).prepare().unwrap();
        assert!(!status.contains(CardStatus::SLEEP));
    }

    #[test]
    fn test_prepare_enables_ready_line() {
        let mut card = DummyCard::new(DummyCardConfig::default().with_ready_line(true));
        let mut proto = protocol(&mut card);
        proto.prepare().unwrap();
        assert!(proto.uses_ready_line());
    }

    #[test]
    fn test_prepare_falls_back_to_polling() {
        let mut config = DummyCardConfig::default().with_ready_line(true);
        config.int_capable = false;
        let mut card = DummyCard::new(config);
        let mut proto = protocol(&mut card);
        proto.prepare().unwrap();
        assert!(!proto.uses_ready_line());
    }

    #[test]
    fn test_erase_card() {
        let mut card = DummyCard::with_data(DummyCardConfig::default(), &[0x00; 0x1000]);
        let mut proto = protocol(&mut card);
        proto.identify().unwrap();
        assert!(matches!(
            proto.erase_card(),
            Err(Error::EraseRejected { status }) if status & CardStatus::ERASE_ERROR.bits() != 0
        ));

        proto.unlock().unwrap();
        proto.erase_card().unwrap();
        assert!(card.data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_erase_card_needs_identify() {
        let mut card = DummyCard::new(DummyCardConfig::default().unlocked());
        assert_eq!(protocol(&mut card).erase_card(), Err(Error::NotIdentified));
        assert!(!card.stats().opcodes.contains(&opcodes::ERASE_CARD));
    }

    #[test]
    fn test_write_buffer_waits_for_ready() {
        let mut card = DummyCard::new_default();
        protocol(&mut card).write_buffer().unwrap();
        assert_eq!(card.stats().opcodes[0], opcodes::WRITE_BUFFER);
        assert!(card
            .stats()
            .opcodes
            .iter()
            .skip(1)
            .all(|&op| op == opcodes::READ_STATUS));
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut card = DummyCard::new(DummyCardConfig::default().unlocked());
        let mut frame = [0u8; 0x80];
        frame[0] = 0x0F;
        let mut cmd = BusCommand::program_page(opcodes::PROGRAM_PAGE, 0x100, &frame);
        card.send_command(&mut cmd).unwrap();
        assert_eq!(card.data()[0x100], 0x0F);

        frame[0] = 0xF0;
        let mut cmd = BusCommand::program_page(opcodes::PROGRAM_PAGE, 0x100, &frame);
        card.send_command(&mut cmd).unwrap();
        assert_eq!(card.data()[0x100], 0x00);
    }
}
