//! Hashing utilities for proof-of-work stamps
//!
//! Hashcash stamps are checked against a SHA-1 digest read as a 160-bit
//! big-endian integer.

use ::sha1::{Digest, Sha1};

/// Length of a SHA-1 digest in bits
pub const DIGEST_BITS: u32 = 160;

/// Computes the SHA-1 digest of the input data
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Computes the SHA-1 digest and returns it as a hex string
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(sha1(data))
}

/// Number of leading zero bits in a digest
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Checks if a hash meets the difficulty target
/// The hash must have `difficulty` leading zero bits
pub fn meets_difficulty(hash: &[u8], difficulty: u32) -> bool {
    let required_zeros = difficulty as usize / 8;
    let remaining_bits = difficulty as usize % 8;

    if required_zeros > hash.len() || (required_zeros == hash.len() && remaining_bits > 0) {
        return false;
    }

    // Check full zero bytes
    if hash.iter().take(required_zeros).any(|b| *b != 0) {
        return false;
    }

    // Check remaining bits
    if remaining_bits > 0 {
        let mask = 0xFFu8 << (8 - remaining_bits);
        if hash[required_zeros] & mask != 0 {
            return false;
        }
    }

    true
}
