//! Pre-mined stamp pool
//!
//! Keeps a bounded queue of ready stamps per recipient so a sender does not pay the
//! minting cost on the hot path. Refills run on blocking workers and stop when the
//! pool is shut down.

use crate::crypto::hashcash::MAX_STAMP_AGE_SECS;
use crate::mining::miner::{MintError, Minter};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Default number of stamps kept per recipient
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Pooled stamps older than this are discarded before the verifier would call them stale
pub const POOLED_STAMP_TTL_SECS: i64 = MAX_STAMP_AGE_SECS - 300;

/// Pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Token pool is shut down")]
    Cancelled,
    #[error("Minting worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Mint(#[from] MintError),
}

#[derive(Debug, Clone)]
struct PooledStamp {
    header: String,
    minted_at: DateTime<Utc>,
}

/// Per-recipient pool of pre-mined hashcash stamps
pub struct TokenPool {
    minter: Minter,
    max_pool_size: usize,
    tokens: Mutex<HashMap<String, VecDeque<PooledStamp>>>,
    mining: Mutex<HashSet<String>>,
    cancelled: AtomicBool,
}

impl TokenPool {
    pub fn new(bits: u32, max_pool_size: usize) -> Result<Self, PoolError> {
        Ok(Self {
            minter: Minter::new(bits)?,
            max_pool_size,
            tokens: Mutex::new(HashMap::new()),
            mining: Mutex::new(HashSet::new()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Take a stamp for `resource`: a pooled one if available, otherwise mint one now.
    /// Either way a background refill is started.
    pub async fn take(self: &Arc<Self>, resource: &str) -> Result<String, PoolError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(PoolError::Cancelled);
        }

        if let Some(header) = self.pop_fresh(resource, Utc::now()) {
            log::debug!(
                "Using pre-mined stamp for {} ({} left)",
                resource,
                self.pooled(resource)
            );
            self.ensure_filled(resource);
            return Ok(header);
        }

        log::debug!("No pre-mined stamp for {}, minting now", resource);
        let pool = Arc::clone(self);
        let owned = resource.to_string();
        let minted = tokio::task::spawn_blocking(move || {
            pool.minter
                .mint_until(&owned, Utc::now(), &pool.cancelled)
                .map(|(header, _)| header)
        })
        .await
        .map_err(|e| PoolError::Worker(e.to_string()))?;

        let header = minted.ok_or(PoolError::Cancelled)?;
        self.ensure_filled(resource);
        Ok(header)
    }

    /// Start a background refill for `resource` unless one is running or the pool is full
    pub fn ensure_filled(self: &Arc<Self>, resource: &str) {
        if self.cancelled.load(Ordering::Relaxed) || self.pooled(resource) >= self.max_pool_size {
            return;
        }

        if !lock(&self.mining).insert(resource.to_string()) {
            return;
        }

        let pool = Arc::clone(self);
        let owned = resource.to_string();
        tokio::task::spawn_blocking(move || pool.fill(&owned));
    }

    /// Number of stamps currently pooled for `resource`
    pub fn pooled(&self, resource: &str) -> usize {
        lock(&self.tokens).get(resource).map_or(0, VecDeque::len)
    }

    pub fn is_mining(&self, resource: &str) -> bool {
        lock(&self.mining).contains(resource)
    }

    /// Stop all minting and drop pooled stamps
    pub fn shutdown(&self) {
        log::debug!("Shutting down token pool");
        self.cancelled.store(true, Ordering::Relaxed);
        lock(&self.tokens).clear();
    }

    fn fill(&self, resource: &str) {
        log::debug!("Background minting for {} started", resource);

        while self.pooled(resource) < self.max_pool_size {
            let now = Utc::now();
            match self.minter.mint_until(resource, now, &self.cancelled) {
                Some((header, _)) => {
                    lock(&self.tokens)
                        .entry(resource.to_string())
                        .or_default()
                        .push_back(PooledStamp {
                            header,
                            minted_at: now,
                        });
                }
                None => break,
            }
        }

        lock(&self.mining).remove(resource);
        log::debug!("Background minting for {} finished", resource);
    }

    fn pop_fresh(&self, resource: &str, now: DateTime<Utc>) -> Option<String> {
        let mut tokens = lock(&self.tokens);
        let queue = tokens.get_mut(resource)?;
        let cutoff = now - Duration::seconds(POOLED_STAMP_TTL_SECS);

        while let Some(stamp) = queue.pop_front() {
            if stamp.minted_at > cutoff {
                return Some(stamp.header);
            }
        }
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashcash::{evaluate, Score};
    use std::time::Duration as StdDuration;

    const RESOURCE: &str = "carol#pool.example";

    async fn wait_for_full(pool: &TokenPool, size: usize) {
        for _ in 0..200 {
            if pool.pooled(RESOURCE) >= size && !pool.is_mining(RESOURCE) {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("pool never filled");
    }

    #[tokio::test]
    async fn test_take_mints_and_refills() {
        let pool = Arc::new(TokenPool::new(6, 3).unwrap());

        let first = pool.take(RESOURCE).await.unwrap();
        assert_eq!(
            evaluate(Some(&first), RESOURCE, Utc::now()),
            Ok(Score::Suspect)
        );

        wait_for_full(&pool, 3).await;

        let second = pool.take(RESOURCE).await.unwrap();
        assert_ne!(first, second);
        assert!(pool.pooled(RESOURCE) <= 3);
    }

    #[tokio::test]
    async fn test_stale_pooled_stamps_are_skipped() {
        let pool = TokenPool::new(6, 3).unwrap();
        let now = Utc::now();
        lock(&pool.tokens).insert(
            RESOURCE.to_string(),
            VecDeque::from(vec![
                PooledStamp {
                    header: "old".to_string(),
                    minted_at: now - Duration::seconds(POOLED_STAMP_TTL_SECS + 1),
                },
                PooledStamp {
                    header: "fresh".to_string(),
                    minted_at: now,
                },
            ]),
        );

        assert_eq!(pool.pop_fresh(RESOURCE, now).as_deref(), Some("fresh"));
        assert_eq!(pool.pop_fresh(RESOURCE, now), None);
    }

    #[tokio::test]
    async fn test_shutdown_cancels() {
        let pool = Arc::new(TokenPool::new(6, 3).unwrap());
        pool.shutdown();

        assert!(matches!(
            pool.take(RESOURCE).await,
            Err(PoolError::Cancelled)
        ));
        assert_eq!(pool.pooled(RESOURCE), 0);
    }

    #[test]
    fn test_pool_rejects_unreachable_difficulty() {
        assert!(matches!(
            TokenPool::new(161, 3),
            Err(PoolError::Mint(MintError::DifficultyTooHigh(161)))
        ));
    }
}
