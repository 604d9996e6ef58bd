//! Identity-map overlay used by `execute` scopes.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::storage::{DocumentKey, Handle, StoreResult};
use crate::store::{DocumentStore, ScopeBody};
use crate::transaction::{TransactionOverlay, TransactionRegistry};

/// A non-transactional scope over a delegate store.
///
/// Reads lock the key on the delegate and are memoized for as long as the
/// memoized handle holds that lock. Once it gives the lock up (a put, a
/// release, a rolled back nested transaction) the next read locks again.
/// Puts and deletes are applied to the delegate immediately and then
/// reflected in the map.
pub struct CacheOverlay<'a, S: DocumentStore + ?Sized> {
    delegate: &'a S,
    cached: Mutex<HashMap<DocumentKey, Handle<S::Doc>>>,
    closed: bool,
}

impl<'a, S: DocumentStore + ?Sized> CacheOverlay<'a, S> {
    pub fn new(delegate: &'a S) -> Self {
        Self {
            delegate,
            cached: Mutex::new(HashMap::new()),
            closed: false,
        }
    }

    /// Number of memoized keys.
    pub fn len(&self) -> usize {
        self.cached.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.lock().is_empty()
    }

    /// Run `body` against the cache, then close it.
    ///
    /// The body's result is returned as is; nothing is undone on error.
    pub(crate) fn run(self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        let result = body(&self);
        self.close();
        result
    }

    /// End the scope, releasing every lock its memoized handles still hold.
    pub fn close(mut self) {
        self.release_held();
    }

    fn release_held(&mut self) {
        self.closed = true;
        let cached = std::mem::take(&mut *self.cached.lock());

        let mut released = 0usize;
        for (key, handle) in cached {
            if !handle.holds_token() {
                continue;
            }
            match self.delegate.release(&handle) {
                Ok(()) => released += 1,
                Err(e) => warn!(key = %key, error = %e, "failed to release cached lock"),
            }
        }
        debug!(released, "cache scope closed");
    }
}

impl<'a, S: DocumentStore + ?Sized> Drop for CacheOverlay<'a, S> {
    fn drop(&mut self) {
        if !self.closed {
            self.release_held();
        }
    }
}

impl<'a, S: DocumentStore + ?Sized> DocumentStore for CacheOverlay<'a, S> {
    type Doc = S::Doc;

    fn key_of(&self, handle: &Handle<S::Doc>) -> StoreResult<DocumentKey> {
        self.delegate.key_of(handle)
    }

    fn new_instance(&self, key: Option<DocumentKey>) -> Handle<S::Doc> {
        self.delegate.new_instance(key)
    }

    fn get(&self, key: &DocumentKey) -> StoreResult<Handle<S::Doc>> {
        self.lock(key)
    }

    fn lock(&self, key: &DocumentKey) -> StoreResult<Handle<S::Doc>> {
        let mut cached = self.cached.lock();
        if let Some(handle) = cached.get(key).filter(|h| h.holds_token()) {
            return Ok(handle.clone());
        }

        // first read, or the memoized handle no longer holds the lock
        let handle = self.delegate.lock(key)?;
        cached.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    fn release(&self, handle: &Handle<S::Doc>) -> StoreResult<()> {
        self.delegate.release(handle)
    }

    fn put(&self, handle: &Handle<S::Doc>) -> StoreResult<()> {
        self.delegate.put(handle)?;
        let key = self.delegate.key_of(handle)?;
        self.cached.lock().insert(key, handle.clone());
        Ok(())
    }

    fn delete(&self, handle: &Handle<S::Doc>) -> StoreResult<()> {
        self.delegate.delete(handle)?;
        let key = self.delegate.key_of(handle)?;
        self.cached.lock().remove(&key);
        Ok(())
    }

    fn transactions(&self) -> &TransactionRegistry {
        self.delegate.transactions()
    }

    fn transact_scope(&self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        TransactionOverlay::begin(self).run(body)
    }

    fn execute_scope(&self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        body(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use serde_json::json;

    use crate::storage::{JsonDocument, MemoryStore, StoreError};
    use crate::store::StoreExt;

    fn key(k: &str) -> DocumentKey {
        DocumentKey::new(k)
    }

    fn seeded() -> MemoryStore<JsonDocument> {
        let store: MemoryStore<JsonDocument> = MemoryStore::new();
        for (k, hp) in [("a", 10), ("b", 20)] {
            let handle = store.new_instance_at(k).with(|d| {
                d.set("hp", hp);
            });
            store.put(&handle).unwrap();
        }
        store
    }

    #[test]
    fn test_reads_are_canonical_and_locked() {
        let store = seeded();

        store
            .execute(|cache| {
                let first = cache.get(&key("a"))?;
                let second = cache.lock(&key("a"))?;
                assert!(first.ptr_eq(&second));
                assert!(matches!(store.lock(&key("a")), Err(StoreError::LockConflict { .. })));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.stats().locked, 0);
        assert!(store.lock(&key("a")).is_ok());
    }

    #[test]
    fn test_writes_pass_through() {
        let store = seeded();

        store
            .execute(|cache| {
                let a = cache.get(&key("a"))?;
                a.update(|d| {
                    d.set("hp", 11);
                });
                cache.put(&a)?;
                // visible on the base before the scope ends
                assert_eq!(store.get(&key("a")).unwrap().read().get("hp"), Some(&json!(11)));

                // the put gave the lock up, so the next read locks again
                let relocked = cache.get(&key("a"))?;
                assert!(!relocked.ptr_eq(&a));
                assert!(relocked.holds_token());
                assert_eq!(relocked.read().get("hp"), Some(&json!(11)));
                assert!(cache.get(&key("a"))?.ptr_eq(&relocked));
                assert!(matches!(store.lock(&key("a")), Err(StoreError::LockConflict { .. })));

                let b = cache.get(&key("b"))?;
                cache.delete(&b)?;
                let gone = cache.get(&key("b"))?;
                assert!(!gone.ptr_eq(&b));
                assert!(gone.read().is_empty());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.stats().records, 1);
        assert_eq!(store.stats().locked, 0);
    }

    #[test]
    fn test_read_after_fresh_insert_locks() {
        let store = seeded();

        store
            .execute(|cache| {
                let fresh = cache.new_instance(Some(key("c"))).with(|d| {
                    d.set("hp", 30);
                });
                cache.put(&fresh)?;
                assert!(!fresh.holds_token());

                let read = cache.get(&key("c"))?;
                assert!(read.holds_token());
                assert_eq!(read.read().get("hp"), Some(&json!(30)));
                assert_eq!(read.tag().map(|t| t.version), Some(1));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get(&key("c")).unwrap().read().get("hp"), Some(&json!(30)));
    }

    #[test]
    fn test_release_passes_through() {
        let store = seeded();

        store
            .execute(|cache| {
                let a = cache.get(&key("a"))?;
                cache.release(&a)?;
                let other = store.lock(&key("a")).unwrap();
                store.release(&other).unwrap();

                let again = cache.get(&key("a"))?;
                assert!(again.holds_token());
                assert!(matches!(store.lock(&key("a")), Err(StoreError::LockConflict { .. })));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_body_error_keeps_applied_writes() {
        let store = seeded();

        let result: StoreResult<()> = store.execute(|cache| {
            let a = cache.get(&key("a"))?;
            a.update(|d| {
                d.set("hp", 0);
            });
            cache.put(&a)?;
            cache.get(&key("b"))?;
            Err(StoreError::aborted("stop"))
        });

        assert!(matches!(result, Err(StoreError::Aborted(_))));
        assert_eq!(store.get(&key("a")).unwrap().read().get("hp"), Some(&json!(0)));
        assert_eq!(store.stats().locked, 0);
    }

    #[test]
    fn test_transaction_inside_cache() {
        let store = seeded();

        store
            .execute(|cache| {
                let a = cache.get(&key("a"))?;
                let from_tx = cache.transact(|tx| {
                    let h = tx.get(&key("a"))?;
                    h.update(|d| {
                        d.set("hp", 99);
                    });
                    tx.put(&h)?;
                    Ok(h)
                })?;
                assert!(from_tx.ptr_eq(&a));
                assert_eq!(store.get(&key("a")).unwrap().read().get("hp"), Some(&json!(99)));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.stats().locked, 0);
        assert_eq!(store.transactions().active_count(), 0);
    }

    #[test]
    fn test_failed_transaction_inside_cache() {
        let store = seeded();

        store
            .execute(|cache| {
                let result: StoreResult<()> = cache.transact(|tx| {
                    let b = tx.get(&key("b"))?;
                    tx.delete(&b)?;
                    Err(StoreError::aborted("no"))
                });
                assert!(result.is_err());
                assert!(cache.get(&key("b"))?.tag().is_some());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.stats().records, 2);
    }

    #[test]
    fn test_rolled_back_transaction_does_not_leave_key_unlocked() {
        let store = seeded();

        store
            .execute(|cache| {
                let before = cache.get(&key("b"))?;
                let result: StoreResult<()> = cache.transact(|tx| {
                    tx.get(&key("b"))?;
                    Err(StoreError::aborted("no"))
                });
                assert!(result.is_err());
                // the rollback released the cache's own lock
                assert!(!before.holds_token());

                let after = cache.get(&key("b"))?;
                assert!(after.holds_token());
                assert!(matches!(store.lock(&key("b")), Err(StoreError::LockConflict { .. })));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.stats().locked, 0);
    }

    #[test]
    fn test_transaction_after_cached_put_holds_lock() {
        let store = seeded();

        store
            .execute(|cache| {
                let a = cache.get(&key("a"))?;
                a.update(|d| {
                    d.set("hp", 1);
                });
                cache.put(&a)?;

                cache.transact(|tx| {
                    let h = tx.get(&key("a"))?;
                    assert!(h.holds_token());
                    assert!(matches!(store.lock(&key("a")), Err(StoreError::LockConflict { .. })));
                    h.update(|d| {
                        d.set("hp", 2);
                    });
                    tx.put(&h)
                })?;
                Ok(())
            })
            .unwrap();

        let stored = store.get(&key("a")).unwrap();
        assert_eq!(stored.read().get("hp"), Some(&json!(2)));
        assert_eq!(stored.tag().map(|t| t.version), Some(3));
        assert_eq!(store.stats().locked, 0);
    }

    #[test]
    fn test_nested_execute_is_same_cache() {
        let store = seeded();

        store
            .execute(|cache| {
                let outer = cache.get(&key("a"))?;
                let inner = cache.execute(|nested| nested.get(&key("a")))?;
                assert!(outer.ptr_eq(&inner));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_manual_close_and_drop() {
        let store = seeded();

        let cache = CacheOverlay::new(&store);
        assert!(cache.is_empty());
        cache.get(&key("a")).unwrap();
        cache.get(&key("b")).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(store.stats().locked, 2);
        cache.close();
        assert_eq!(store.stats().locked, 0);

        {
            let cache = CacheOverlay::new(&store);
            cache.get(&key("missing")).unwrap();
            assert_eq!(store.stats().placeholders, 1);
        }
        assert_eq!(store.stats().locked, 0);
        assert_eq!(store.stats().placeholders, 0);
    }

    #[test]
    fn test_panic_in_body_releases_locks() {
        let store = seeded();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: StoreResult<()> = store.execute(|cache| {
                cache.get(&key("a"))?;
                panic!("body blew up");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(store.stats().locked, 0);
    }
}
