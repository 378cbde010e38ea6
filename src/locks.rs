//! Sharded in-process single-writer locks keyed by `run_id`/`batch_id`.
//!
//! Per §5, all state transitions for a given run (and all counter updates for
//! a given map batch) must be serialized. We pick the run-id-sharded
//! single-writer discipline: an async mutex per shard, shard selected by a
//! hash of the key, held for the duration of one orchestration step on top of
//! a `BEGIN IMMEDIATE` SQLite transaction. This crate does not mix disciplines
//! (no additional row locks) per the design note in §9.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

const SHARD_COUNT: usize = 64;

fn shard_of(key: &str) -> usize {
    let mut hash: u64 = 1469598103934665603; // FNV-1a offset basis
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash as usize) % SHARD_COUNT
}

/// A fixed-size pool of mutexes, one per shard, indexed by hashing the key.
///
/// Two different keys may collide onto the same shard (coarser than a
/// per-key lock), which only adds contention, never incorrectness: both
/// callers still see serialized execution.
pub struct KeyedLock {
    shards: Vec<Arc<Mutex<()>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    /// Acquire the lock guarding `key`. Hold the guard for the duration of
    /// one orchestration step.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[shard_of(key)].lock().await
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// The two serialization domains the orchestration core needs: one per run,
/// one per map batch. Kept as separate pools so a batch dispatch (which
/// itself runs inside a run-level step) never deadlocks against the run lock.
pub struct LockRegistry {
    pub runs: KeyedLock,
    pub batches: KeyedLock,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            runs: KeyedLock::new(),
            batches: KeyedLock::new(),
        }
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
