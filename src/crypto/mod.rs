//! Cryptographic utilities for admission control
//!
//! This module provides:
//! - SHA-1 hashing and leading-zero-bit checks
//! - Hashcash stamp parsing and scoring

pub mod hash;
pub mod hashcash;

pub use hash::{leading_zero_bits, meets_difficulty, sha1, sha1_hex, DIGEST_BITS};
pub use hashcash::{
    evaluate, format_stamp_date, score, Disposition, HashcashError, Score, Stamp, GOOD_BITS,
    HASHCASH_VERSION, MAX_STAMP_AGE_SECS, TRIVIAL_BITS, WEAK_BITS,
};
