//! The uniform store contract.
//!
//! [`DocumentStore`] is object safe so a scope body can receive whatever
//! store is in effect (`&dyn DocumentStore`) and overlays can wrap overlays.
//! The closure-taking conveniences `transact` and `execute` live on
//! [`StoreExt`], which every store (trait objects included) gets for free.

use crate::storage::{Document, DocumentKey, Handle, StoreError, StoreResult};
use crate::transaction::TransactionRegistry;

/// A scope body as seen by the object-safe half of the contract.
///
/// Returning `Err` from the body rolls a transactional scope back.
pub type ScopeBody<'s, D> = dyn FnMut(&dyn DocumentStore<Doc = D>) -> StoreResult<()> + 's;

/// Operations every store, base or overlay, supports.
pub trait DocumentStore: Send + Sync {
    type Doc: Document;

    /// The key a handle refers to.
    fn key_of(&self, handle: &Handle<Self::Doc>) -> StoreResult<DocumentKey>;

    /// A fresh, never-stored handle at version 0. Generates a key if none is given.
    fn new_instance(&self, key: Option<DocumentKey>) -> Handle<Self::Doc>;

    /// The current document for `key`, or a fresh instance if there is none.
    fn get(&self, key: &DocumentKey) -> StoreResult<Handle<Self::Doc>>;

    /// Take the pessimistic lock on `key`. Fails fast if it is held.
    fn lock(&self, key: &DocumentKey) -> StoreResult<Handle<Self::Doc>>;

    /// Give up the lock the handle holds.
    fn release(&self, handle: &Handle<Self::Doc>) -> StoreResult<()>;

    /// Store the handle's document as the next version of its key.
    fn put(&self, handle: &Handle<Self::Doc>) -> StoreResult<()>;

    /// Remove the handle's key.
    fn delete(&self, handle: &Handle<Self::Doc>) -> StoreResult<()>;

    /// Registry of the transactions running against this store's base.
    fn transactions(&self) -> &TransactionRegistry;

    /// Run `body` inside a transactional scope.
    fn transact_scope(&self, body: &mut ScopeBody<'_, Self::Doc>) -> StoreResult<()>;

    /// Run `body` inside a non-transactional, read-canonicalizing scope.
    fn execute_scope(&self, body: &mut ScopeBody<'_, Self::Doc>) -> StoreResult<()>;
}

/// Closure-friendly scope entry points.
pub trait StoreExt: DocumentStore {
    /// Execute a function within a transaction, committing if it returns Ok
    /// and rolling back otherwise.
    fn transact<T, F>(&self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn DocumentStore<Doc = Self::Doc>) -> StoreResult<T>,
    {
        let mut body = Some(body);
        let mut output = None;
        self.transact_scope(&mut |store| {
            if let Some(body) = body.take() {
                output = Some(body(store)?);
            }
            Ok(())
        })?;
        output.ok_or_else(|| StoreError::Internal("transaction body was not run".to_string()))
    }

    /// Execute a function within a caching scope.
    fn execute<T, F>(&self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn DocumentStore<Doc = Self::Doc>) -> StoreResult<T>,
    {
        let mut body = Some(body);
        let mut output = None;
        self.execute_scope(&mut |store| {
            if let Some(body) = body.take() {
                output = Some(body(store)?);
            }
            Ok(())
        })?;
        output.ok_or_else(|| StoreError::Internal("execution body was not run".to_string()))
    }

    /// `new_instance` with an explicit key.
    fn new_instance_at(&self, key: impl Into<DocumentKey>) -> Handle<Self::Doc> {
        self.new_instance(Some(key.into()))
    }
}

impl<S: DocumentStore + ?Sized> StoreExt for S {}
