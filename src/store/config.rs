//! Store configuration.

use chrono::Duration;

/// How long a pessimistic lock lives before anyone may reclaim it.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 60;

/// Number of critical-section shards in the record table.
pub const DEFAULT_SHARDS: usize = 64;

/// Memory store configuration options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lock lifetime, measured from acquisition.
    pub lock_ttl: Duration,
    /// Number of shards in the record table. Keys hashing to different
    /// shards never contend.
    pub shards: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::seconds(DEFAULT_LOCK_TTL_SECS),
            shards: DEFAULT_SHARDS,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock lifetime.
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the shard count (at least one shard is always used).
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }
}
