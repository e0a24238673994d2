//! Hashcash minting
//!
//! Searches for a counter that gives a stamp the requested number of leading
//! zero bits. This is the client-side cost a sender pays per message.

use crate::crypto::hash::{meets_difficulty, sha1, DIGEST_BITS};
use crate::crypto::hashcash::{format_stamp_date, HASHCASH_VERSION};
use chrono::{DateTime, Utc};
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Length of the random salt field
pub const RAND_LEN: usize = 16;

/// How many attempts run between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Minting errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MintError {
    #[error("Cannot mint {0} bits: a SHA-1 digest has only 160")]
    DifficultyTooHigh(u32),
}

/// Minting statistics
#[derive(Debug, Clone)]
pub struct MintStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Mints hashcash stamps at a fixed difficulty
#[derive(Debug, Clone, Copy)]
pub struct Minter {
    bits: u32,
}

impl Minter {
    /// A minter for `bits`; no counter can beat a full digest of zeros
    pub fn new(bits: u32) -> Result<Self, MintError> {
        if bits > DIGEST_BITS {
            return Err(MintError::DifficultyTooHigh(bits));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Mint a stamp for `resource` dated `now`
    pub fn mint(&self, resource: &str, now: DateTime<Utc>) -> (String, MintStats) {
        let never = AtomicBool::new(false);
        loop {
            // None here means the counter space ran out; retry with a fresh salt
            if let Some(found) = self.mint_until(resource, now, &never) {
                return found;
            }
        }
    }

    /// Mint a stamp, giving up with `None` once `cancel` is set
    pub fn mint_until(
        &self,
        resource: &str,
        now: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> Option<(String, MintStats)> {
        let start = Instant::now();
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RAND_LEN)
            .map(char::from)
            .collect();
        let prefix = format!(
            "{}:{}:{}:{}::{}:",
            HASHCASH_VERSION,
            self.bits,
            format_stamp_date(now),
            resource,
            salt
        );

        debug!("Minting hashcash({}) for {}", self.bits, resource);

        let mut counter = 0u64;
        loop {
            if counter % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                debug!("Minting for {} cancelled after {} attempts", resource, counter);
                return None;
            }

            let header = format!("{}{:x}", prefix, counter);
            if meets_difficulty(&sha1(header.as_bytes()), self.bits) {
                let stats = stats(counter + 1, start);
                debug!(
                    "Minted hashcash({}) for {} in {}ms ({} attempts, {:.2} H/s)",
                    self.bits, resource, stats.time_ms, stats.hash_attempts, stats.hash_rate
                );
                return Some((header, stats));
            }

            counter = counter.checked_add(1)?;
        }
    }
}

fn stats(attempts: u64, start: Instant) -> MintStats {
    let elapsed = start.elapsed().as_millis();
    let hash_rate = if elapsed > 0 {
        (attempts as f64) / (elapsed as f64 / 1000.0)
    } else {
        attempts as f64
    };

    MintStats {
        hash_attempts: attempts,
        time_ms: elapsed,
        hash_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashcash::{evaluate, Score, Stamp};

    #[test]
    fn test_minter() {
        let now = Utc::now();
        let (header, stats) = Minter::new(8).unwrap().mint("bob#example.org", now);

        let stamp = Stamp::parse(&header).unwrap();
        assert_eq!(stamp.bits, 8);
        assert_eq!(stamp.resource, "bob#example.org");
        assert_eq!(stamp.ext, "");
        assert_eq!(stamp.rand.len(), RAND_LEN);
        assert!(stats.hash_attempts > 0);
        assert_eq!(
            evaluate(Some(&header), "bob#example.org", now),
            Ok(Score::Suspect)
        );
    }

    #[test]
    fn test_mint_until_cancelled() {
        let cancel = AtomicBool::new(true);
        let result = Minter::new(64).unwrap().mint_until("bob#example.org", Utc::now(), &cancel);
        assert!(result.is_none());
    }

    #[test]
    fn test_unreachable_difficulty_rejected() {
        assert_eq!(
            Minter::new(DIGEST_BITS + 1).unwrap_err(),
            MintError::DifficultyTooHigh(DIGEST_BITS + 1)
        );
        assert_eq!(Minter::new(DIGEST_BITS).unwrap().bits(), DIGEST_BITS);
    }
}
