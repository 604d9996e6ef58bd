//! Transaction overlay.
//!
//! A [`TransactionOverlay`] wraps any store for the lifetime of one
//! transactional scope:
//! - every key read is locked on the delegate once and memoized, so repeated
//!   reads return the identical handle and nobody else can write the key
//!   until the scope ends
//! - puts and deletes are buffered and only reach the delegate on commit
//! - only handles the scope itself issued are accepted for writes
//!
//! Commit applies deletes, then puts, then releases whatever was only read.
//! Rollback releases every lock and drops the buffers. Dropping an overlay
//! that was neither committed nor rolled back rolls it back.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::storage::{DocumentKey, Handle, StoreError, StoreResult};
use crate::store::{DocumentStore, ScopeBody};
use crate::transaction::manager::{TransactionInfo, TransactionRegistry};

/// keyed handles in insertion order; re-inserting a key keeps its slot
struct PendingOps<D> {
    entries: Vec<(DocumentKey, Handle<D>)>,
}

impl<D> Default for PendingOps<D> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<D> PendingOps<D> {
    fn insert(&mut self, key: DocumentKey, handle: Handle<D>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = handle,
            None => self.entries.push((key, handle)),
        }
    }

    fn get(&self, key: &DocumentKey) -> Option<&Handle<D>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, h)| h)
    }

    fn contains(&self, key: &DocumentKey) -> bool {
        self.get(key).is_some()
    }

    fn remove(&mut self, key: &DocumentKey) -> Option<Handle<D>> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct TxState<D> {
    /// delegate-level locks taken by this scope
    locked: HashMap<DocumentKey, Handle<D>>,
    puts: PendingOps<D>,
    deletes: PendingOps<D>,
    /// serials of every handle this scope issued
    members: HashSet<u64>,
}

impl<D> Default for TxState<D> {
    fn default() -> Self {
        Self {
            locked: HashMap::new(),
            puts: PendingOps::default(),
            deletes: PendingOps::default(),
            members: HashSet::new(),
        }
    }
}

impl<D> TxState<D> {
    fn adopt(&mut self, handle: Handle<D>) -> Handle<D> {
        self.members.insert(handle.serial());
        handle
    }

    fn is_member(&self, handle: &Handle<D>) -> bool {
        self.members.contains(&handle.serial())
    }
}

/// A transactional scope over a delegate store.
pub struct TransactionOverlay<'a, S: DocumentStore + ?Sized> {
    delegate: &'a S,
    info: TransactionInfo,
    state: Mutex<TxState<S::Doc>>,
    finished: bool,
}

impl<'a, S: DocumentStore + ?Sized> TransactionOverlay<'a, S> {
    /// Begin a transaction over `delegate`.
    pub fn begin(delegate: &'a S) -> Self {
        let info = delegate.transactions().begin();
        debug!(tx = %info.id, "transaction started");

        Self {
            delegate,
            info,
            state: Mutex::new(TxState::default()),
            finished: false,
        }
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &TransactionInfo {
        &self.info
    }

    /// Number of keys with a buffered put.
    pub fn pending_puts(&self) -> usize {
        self.state.lock().puts.len()
    }

    /// Number of keys with a buffered delete.
    pub fn pending_deletes(&self) -> usize {
        self.state.lock().deletes.len()
    }

    /// Number of delegate-level locks currently held by the scope.
    pub fn locks_held(&self) -> usize {
        self.state.lock().locked.len()
    }

    /// Run `body` against this transaction, committing if it succeeds and
    /// rolling back if it fails.
    pub(crate) fn run(self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        match body(&self) {
            Ok(()) => self.commit(),
            Err(e) => {
                debug!(tx = %self.info.id, error = %e, "transaction body failed");
                self.rollback();
                Err(e)
            }
        }
    }

    /// Commit the transaction.
    ///
    /// Each key's effect is a separate delegate call. If one fails, the
    /// keys already applied stay applied, the remaining locks are released
    /// and the error is returned.
    pub fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        let mut state = std::mem::take(&mut *self.state.lock());
        let (puts, deletes) = (state.puts.len(), state.deletes.len());

        let result = self.apply(&mut state);

        // what is still held was only read, or the commit stopped part way
        self.release_all(&mut state);
        self.delegate.transactions().finish(&self.info.id);

        match &result {
            Ok(()) => debug!(tx = %self.info.id, puts, deletes, "transaction committed"),
            Err(e) => warn!(tx = %self.info.id, error = %e, "transaction commit failed"),
        }
        result
    }

    /// Rollback the transaction, releasing every lock it took.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn apply(&self, state: &mut TxState<S::Doc>) -> StoreResult<()> {
        let deletes = std::mem::take(&mut state.deletes);
        for (key, handle) in &deletes.entries {
            self.yield_lock(state, key, handle)?;
            self.delegate.delete(handle)?;
            state.locked.remove(key);
        }

        let puts = std::mem::take(&mut state.puts);
        for (key, handle) in &puts.entries {
            self.yield_lock(state, key, handle)?;
            self.delegate.put(handle)?;
            state.locked.remove(key);
        }
        Ok(())
    }

    /// Release the scope's lock on `key` if `handle` is not the locked
    /// handle itself; the delegate would otherwise refuse `handle`.
    fn yield_lock(
        &self,
        state: &mut TxState<S::Doc>,
        key: &DocumentKey,
        handle: &Handle<S::Doc>,
    ) -> StoreResult<()> {
        if let Some(held) = state.locked.get(key) {
            if !held.ptr_eq(handle) {
                self.delegate.release(held)?;
                state.locked.remove(key);
            }
        }
        Ok(())
    }

    fn release_all(&self, state: &mut TxState<S::Doc>) {
        for (key, handle) in state.locked.drain() {
            if let Err(e) = self.delegate.release(&handle) {
                warn!(tx = %self.info.id, key = %key, error = %e, "failed to release lock");
            }
        }
    }

    fn discard(&mut self) {
        self.finished = true;
        let mut state = std::mem::take(&mut *self.state.lock());
        let discarded = state.puts.len() + state.deletes.len();

        self.release_all(&mut state);
        self.delegate.transactions().finish(&self.info.id);
        debug!(tx = %self.info.id, discarded, "transaction rolled back");
    }
}

impl<'a, S: DocumentStore + ?Sized> Drop for TransactionOverlay<'a, S> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tx = %self.info.id, "transaction dropped while active, rolling back");
            self.discard();
        }
    }
}

impl<'a, S: DocumentStore + ?Sized> DocumentStore for TransactionOverlay<'a, S> {
    type Doc = S::Doc;

    fn key_of(&self, handle: &Handle<S::Doc>) -> StoreResult<DocumentKey> {
        if !self.state.lock().is_member(handle) {
            return Err(StoreError::MembershipViolation);
        }
        self.delegate.key_of(handle)
    }

    fn new_instance(&self, key: Option<DocumentKey>) -> Handle<S::Doc> {
        let handle = self.delegate.new_instance(key);
        self.state.lock().adopt(handle)
    }

    fn get(&self, key: &DocumentKey) -> StoreResult<Handle<S::Doc>> {
        self.lock(key)
    }

    fn lock(&self, key: &DocumentKey) -> StoreResult<Handle<S::Doc>> {
        let mut state = self.state.lock();

        if let Some(handle) = state.puts.get(key) {
            return Ok(handle.clone());
        }
        if state.deletes.contains(key) {
            // deleted in this scope: the key starts over
            let handle = self.delegate.new_instance(Some(key.clone()));
            return Ok(state.adopt(handle));
        }
        if let Some(handle) = state.locked.get(key) {
            return Ok(handle.clone());
        }

        let handle = self.delegate.lock(key)?;
        state.locked.insert(key.clone(), handle.clone());
        Ok(state.adopt(handle))
    }

    fn release(&self, _handle: &Handle<S::Doc>) -> StoreResult<()> {
        // locks are held until the scope ends
        Ok(())
    }

    fn put(&self, handle: &Handle<S::Doc>) -> StoreResult<()> {
        let mut state = self.state.lock();
        if !state.is_member(handle) {
            return Err(StoreError::MembershipViolation);
        }
        let key = self.delegate.key_of(handle)?;
        state.puts.insert(key, handle.clone());
        Ok(())
    }

    fn delete(&self, handle: &Handle<S::Doc>) -> StoreResult<()> {
        let mut state = self.state.lock();
        if !state.is_member(handle) {
            return Err(StoreError::MembershipViolation);
        }
        let key = self.delegate.key_of(handle)?;
        state.puts.remove(&key);
        state.deletes.insert(key, handle.clone());
        Ok(())
    }

    fn transactions(&self) -> &TransactionRegistry {
        self.delegate.transactions()
    }

    fn transact_scope(&self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        // nested transactions join this one
        body(self)
    }

    fn execute_scope(&self, body: &mut ScopeBody<'_, S::Doc>) -> StoreResult<()> {
        body(self)
    }
}
