//! The in-memory base store.
//!
//! This is the authoritative record table. It wraps a sharded map of
//! records with per-shard mutexes and implements the version and lock
//! checks every write goes through. The overlays in `transaction` and
//! `cache` all bottom out here.
//!
//! Each key lives in exactly one shard, and every check-then-write sequence
//! for a key runs with that shard's mutex held. The mutex is held only for
//! the check and the mutation; payload encoding happens before it is taken.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::CacheOverlay;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::document::Document;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::handle::{Handle, HandleTag};
use crate::storage::types::{default_key_generator, DocumentKey, KeyGenerator, LockToken, StoreId};
use crate::store::{DocumentStore, ScopeBody, StoreConfig};
use crate::transaction::{TransactionOverlay, TransactionRegistry};

/// the stored state of one key
#[derive(Debug, Clone)]
struct Record {
    /// `None` for a placeholder created by locking an absent key
    payload: Option<Arc<[u8]>>,
    version: u64,
    lock: Option<LockState>,
}

impl Record {
    fn placeholder() -> Self {
        Self {
            payload: None,
            version: 0,
            lock: None,
        }
    }

    fn is_placeholder(&self) -> bool {
        self.version == 0 && self.payload.is_none()
    }

    fn live_lock(&self, now: DateTime<Utc>) -> Option<&LockState> {
        self.lock.as_ref().filter(|lock| lock.expires_at > now)
    }
}

#[derive(Debug, Clone)]
struct LockState {
    holder: LockToken,
    expires_at: DateTime<Utc>,
}

type Shard = Mutex<FxHashMap<DocumentKey, Record>>;

/// Point-in-time counters for a memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStats {
    /// keys with a stored document
    pub records: usize,
    /// keys locked while absent
    pub placeholders: usize,
    /// unexpired locks
    pub locked: usize,
    pub active_transactions: usize,
}

/// The in-memory document store.
///
/// Clone this to share across threads - it uses Arc internally.
pub struct MemoryStore<D> {
    inner: Arc<MemoryStoreInner<D>>,
}

struct MemoryStoreInner<D> {
    id: StoreId,
    config: StoreConfig,
    shards: Box<[Shard]>,
    keys: Arc<dyn KeyGenerator>,
    clock: Arc<dyn Clock>,
    transactions: TransactionRegistry,
    _document: PhantomData<fn() -> D>,
}

impl<D: Document> MemoryStore<D> {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with custom configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_collaborators(config, default_key_generator(), Arc::new(SystemClock))
    }

    /// Create an empty store with explicit key generator and clock.
    pub fn with_collaborators(
        config: StoreConfig,
        keys: Arc<dyn KeyGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();

        Self {
            inner: Arc::new(MemoryStoreInner {
                id: StoreId::new(),
                config,
                shards,
                keys,
                clock,
                transactions: TransactionRegistry::new(),
                _document: PhantomData,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Clear expired locks and drop placeholders nobody holds any more.
    ///
    /// Expired locks are already ignored by every check, so this is purely
    /// housekeeping. Returns the number of locks cleared.
    pub fn reap_expired_locks(&self) -> usize {
        let now = self.inner.clock.now();
        let mut reaped = 0;

        for shard in self.inner.shards.iter() {
            let mut records = shard.lock();
            for record in records.values_mut() {
                if record.lock.is_some() && record.live_lock(now).is_none() {
                    record.lock = None;
                    reaped += 1;
                }
            }
            records.retain(|_, record| !(record.is_placeholder() && record.lock.is_none()));
        }

        if reaped > 0 {
            debug!(store = %self.inner.id, reaped, "reaped expired locks");
        }
        reaped
    }

    /// Get counters for the store.
    pub fn stats(&self) -> StoreStats {
        let now = self.inner.clock.now();
        let mut stats = StoreStats {
            active_transactions: self.inner.transactions.active_count(),
            ..StoreStats::default()
        };

        for shard in self.inner.shards.iter() {
            for record in shard.lock().values() {
                if record.is_placeholder() {
                    stats.placeholders += 1;
                } else {
                    stats.records += 1;
                }
                if record.live_lock(now).is_some() {
                    stats.locked += 1;
                }
            }
        }
        stats
    }

    fn shard(&self, key: &DocumentKey) -> &Shard {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.inner.shards.len() as u64) as usize;
        &self.inner.shards[index]
    }

    fn issue(
        &self,
        document: D,
        key: DocumentKey,
        version: u64,
        token: Option<LockToken>,
    ) -> Handle<D> {
        Handle::issued(
            document,
            HandleTag {
                store: self.inner.id,
                key,
                version,
                token,
            },
        )
    }

    /// the handle's tag, if this store issued it
    fn own_tag(&self, handle: &Handle<D>) -> StoreResult<HandleTag> {
        match handle.tag() {
            Some(tag) if tag.store == self.inner.id => Ok(tag),
            _ => Err(StoreError::UnknownHandle),
        }
    }

    fn decode(payload: Option<&[u8]>) -> StoreResult<D> {
        match payload {
            Some(bytes) => Ok(D::from_bytes(bytes)?),
            None => Ok(D::empty()),
        }
    }
}

/// the handle must have been read at the record's current version
fn check_version(key: &DocumentKey, expected: u64, record: Option<&Record>) -> StoreResult<()> {
    let actual = record.map_or(0, |r| r.version);
    if expected != actual {
        return Err(StoreError::VersionConflict {
            key: key.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// a live lock may only be passed by its holder
fn check_lock_holder(
    key: &DocumentKey,
    record: Option<&Record>,
    token: Option<&LockToken>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    match record.and_then(|r| r.live_lock(now)) {
        Some(lock) if token != Some(&lock.holder) => {
            Err(StoreError::LockConflict { key: key.clone() })
        }
        _ => Ok(()),
    }
}

impl<D: Document> DocumentStore for MemoryStore<D> {
    type Doc = D;

    fn key_of(&self, handle: &Handle<D>) -> StoreResult<DocumentKey> {
        self.own_tag(handle).map(|tag| tag.key)
    }

    fn new_instance(&self, key: Option<DocumentKey>) -> Handle<D> {
        let key = key.unwrap_or_else(|| self.inner.keys.next_key());
        self.issue(D::empty(), key, 0, None)
    }

    fn get(&self, key: &DocumentKey) -> StoreResult<Handle<D>> {
        let snapshot = {
            let records = self.shard(key).lock();
            records.get(key).map(|r| (r.payload.clone(), r.version))
        };

        match snapshot {
            None => Ok(self.new_instance(Some(key.clone()))),
            Some((payload, version)) => {
                let document = Self::decode(payload.as_deref())?;
                Ok(self.issue(document, key.clone(), version, None))
            }
        }
    }

    fn lock(&self, key: &DocumentKey) -> StoreResult<Handle<D>> {
        let now = self.inner.clock.now();
        let token = LockToken::new(self.inner.keys.next_id());
        let expires_at = now
            .checked_add_signed(self.inner.config.lock_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let (document, version) = {
            let mut records = self.shard(key).lock();
            check_lock_holder(key, records.get(key), None, now)?;

            let record = records.entry(key.clone()).or_insert_with(Record::placeholder);
            let document = Self::decode(record.payload.as_deref())?;
            record.lock = Some(LockState {
                holder: token.clone(),
                expires_at,
            });
            (document, record.version)
        };

        debug!(key = %key, version, %expires_at, "lock acquired");
        Ok(self.issue(document, key.clone(), version, Some(token)))
    }

    fn release(&self, handle: &Handle<D>) -> StoreResult<()> {
        let key = self.own_tag(handle)?.key;
        let now = self.inner.clock.now();

        let mut records = self.shard(&key).lock();
        let tag = self.own_tag(handle)?;

        if let Some(record) = records.get_mut(&key) {
            check_lock_holder(&key, Some(&*record), tag.token.as_ref(), now)?;
            record.lock = None;
            if record.is_placeholder() {
                records.remove(&key);
            }
        }
        handle.modify_tag(|t| t.token = None);

        trace!(key = %key, "lock released");
        Ok(())
    }

    fn put(&self, handle: &Handle<D>) -> StoreResult<()> {
        let key = self.own_tag(handle)?.key;
        let payload: Arc<[u8]> = handle.read().to_bytes()?.into();
        let now = self.inner.clock.now();

        let mut records = self.shard(&key).lock();
        let tag = self.own_tag(handle)?;
        let current = records.get(&key);
        check_version(&key, tag.version, current)?;
        check_lock_holder(&key, current, tag.token.as_ref(), now)?;

        // always a fresh record, which also drops any lock
        let version = tag.version + 1;
        records.insert(
            key.clone(),
            Record {
                payload: Some(payload),
                version,
                lock: None,
            },
        );
        handle.modify_tag(|t| {
            t.version = version;
            t.token = None;
        });

        trace!(key = %key, version, "document stored");
        Ok(())
    }

    fn delete(&self, handle: &Handle<D>) -> StoreResult<()> {
        let key = self.own_tag(handle)?.key;
        let now = self.inner.clock.now();

        let mut records = self.shard(&key).lock();
        let tag = self.own_tag(handle)?;
        let current = records.get(&key);
        check_version(&key, tag.version, current)?;
        check_lock_holder(&key, current, tag.token.as_ref(), now)?;

        // the lock goes with the record
        records.remove(&key);

        trace!(key = %key, "document deleted");
        Ok(())
    }

    fn transactions(&self) -> &TransactionRegistry {
        &self.inner.transactions
    }

    fn transact_scope(&self, body: &mut ScopeBody<'_, D>) -> StoreResult<()> {
        TransactionOverlay::begin(self).run(body)
    }

    fn execute_scope(&self, body: &mut ScopeBody<'_, D>) -> StoreResult<()> {
        CacheOverlay::new(self).run(body)
    }
}

impl<D: Document> Default for MemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for MemoryStore<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> std::fmt::Debug for MemoryStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("id", &self.inner.id)
            .field("shards", &self.inner.shards.len())
            .finish()
    }
}
