//! Unlock handshake primitives
//!
//! A card powers up locked. Before array reads return real data the host
//! must read an encrypted challenge and answer it. Traffic is scrambled with
//! a stream cipher built from a single 32-bit LFSR with taps on bits 8, 16,
//! 24 and 31; bit zero is set when the number of set taps is even and the
//! output is bit 31.
//!
//! This module only holds the arithmetic. The bus sequence is driven by
//! [`super::device::DeviceProtocol::unlock`].

/// Address whose read starts the handshake (also the cipher seed)
pub const UNLOCK_ARRAY_ADDR: u32 = 0x7FEC_8000;

/// Bytes of the first (discarded) handshake read
pub const PRIMER_LEN: usize = 4;

/// Bytes of the flash id at the start of the challenge read
pub const FLASH_ID_LEN: usize = 12;

/// Bytes of the challenge following the flash id
pub const CHALLENGE_LEN: usize = 8;

/// Total length of the challenge read (flash id, challenge, padding)
pub const CHALLENGE_READ_LEN: usize = 24;

const TAP_MASK: u32 = 0x8101_0100;

/// Handshake stream cipher
#[derive(Debug, Clone)]
pub struct HandshakeCipher {
    state: u32,
}

impl HandshakeCipher {
    /// Create a cipher seeded with `seed` (stored bit-reversed)
    pub fn new(seed: u32) -> Self {
        Self {
            state: seed.reverse_bits(),
        }
    }

    /// Clock out `count` (at most 32) key stream bits, MSB first
    pub fn next_bits(&mut self, count: u32) -> u32 {
        debug_assert!(count <= 32);
        let mut result = 0u32;
        for _ in 0..count {
            result <<= 1;
            if self.state & 0x8000_0000 != 0 {
                result |= 1;
            }
            if (self.state & TAP_MASK).count_ones() & 1 == 0 {
                self.state |= 1;
            }
            self.state = (self.state & 0x7FFF_FFFF) << 1;
        }
        result
    }

    /// XOR `data` in place with the key stream
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_bits(8) as u8;
        }
    }
}

/// Compute the card's expected answer to an 8-byte challenge
pub fn challenge_response(challenge: &[u8; CHALLENGE_LEN]) -> u32 {
    let nibbles = |i: usize| ((challenge[i] >> 4) as u32, (challenge[i] & 0xF) as u32);

    let challenge_sum: u32 = challenge.iter().map(|&b| b as u32).sum();
    let mut running_sum = challenge_sum.wrapping_add(0x170A_7489);
    let mut hash: u32 = 0x05EF_E0AA;
    let mut key0: u32 = 0xDAF4_B157;
    let mut key1: u32 = 0x6BBE_C3B6;

    let (mut n0, mut n1) = nibbles(0);
    for (i, swap_offset) in (challenge_sum + 9..challenge_sum + 16).enumerate() {
        let (n2, n3) = nibbles(i + 1);
        let sign = if n3 & 0x8 != 0 { 0xFF00 } else { 0 };
        let mixed = (sign | (n3 << 4) | n1) ^ (n0 << 8) ^ (n2 << 12);
        running_sum = running_sum.wrapping_add(mixed);
        hash = hash.wrapping_add(
            (key0 ^ key1)
                .wrapping_add(running_sum)
                .rotate_right(swap_offset & 0x1F),
        );
        key0 = (!running_sum & hash) | (key1 >> 16) | (running_sum & key1 & 0xFFFF_0000);
        key1 = running_sum ^ hash ^ key0;
        n0 = n2;
        n1 = n3;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_seed_is_bit_reversed() {
        let cipher = HandshakeCipher::new(UNLOCK_ARRAY_ADDR);
        assert_eq!(cipher.state, 0x0001_37FE);
    }

    #[test]
    fn test_cipher_key_stream() {
        let mut cipher = HandshakeCipher::new(UNLOCK_ARRAY_ADDR);
        let mut primer = [0u8; 4];
        cipher.apply(&mut primer);
        assert_eq!(primer, [0x00, 0x01, 0x37, 0xFF]);

        cipher.next_bits(1);
        let mut data = [0u8; 8];
        cipher.apply(&mut data);
        assert_eq!(data, [0x6C, 0x06, 0xB4, 0xDD, 0x48, 0xD3, 0xD0, 0x0E]);
    }

    #[test]
    fn test_cipher_is_symmetric() {
        let mut enc = HandshakeCipher::new(0x1234_5678);
        let mut dec = HandshakeCipher::new(0x1234_5678);
        let mut data = *b"memory card!";
        enc.apply(&mut data);
        assert_ne!(&data, b"memory card!");
        dec.apply(&mut data);
        assert_eq!(&data, b"memory card!");
    }

    #[test]
    fn test_challenge_response_vectors() {
        assert_eq!(challenge_response(&[0; 8]), 0x2434_9566);
        assert_eq!(challenge_response(&[1, 2, 3, 4, 5, 6, 7, 8]), 0xD54E_071D);
        assert_eq!(
            challenge_response(&[0xDE, 0xAD, 0xBE, 0xEF, 0x8F, 0x00, 0x99, 0xF7]),
            0x31B4_EFD0
        );
    }
}
