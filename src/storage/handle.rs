//! Handles: the values stores hand out.
//!
//! A handle is a shared reference to one document plus the tag the issuing
//! store uses to validate later operations (key, version read at, lock
//! token). Cloning a handle clones the reference, not the document, and
//! handle equality is identity: two handles are equal only if they are the
//! same allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::types::{DocumentKey, LockToken, StoreId};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// metadata a store attaches to each handle it issues
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandleTag {
    pub(crate) store: StoreId,
    pub(crate) key: DocumentKey,
    /// version of the record when the handle was read (0 = never stored)
    pub(crate) version: u64,
    /// present only on handles obtained through `lock`
    pub(crate) token: Option<LockToken>,
}

/// A store-issued reference to a document.
pub struct Handle<D> {
    inner: Arc<HandleInner<D>>,
}

struct HandleInner<D> {
    serial: u64,
    document: RwLock<D>,
    tag: Mutex<Option<HandleTag>>,
}

impl<D> Handle<D> {
    /// Wrap a document in a handle no store has issued.
    ///
    /// Stores reject such handles with `UnknownHandle`.
    pub fn detached(document: D) -> Self {
        Self::build(document, None)
    }

    pub(crate) fn issued(document: D, tag: HandleTag) -> Self {
        Self::build(document, Some(tag))
    }

    fn build(document: D, tag: Option<HandleTag>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
                document: RwLock::new(document),
                tag: Mutex::new(tag),
            }),
        }
    }

    /// Read access to the document.
    pub fn read(&self) -> RwLockReadGuard<'_, D> {
        self.inner.document.read()
    }

    /// Write access to the document. Changes are local until the handle is put.
    pub fn write(&self) -> RwLockWriteGuard<'_, D> {
        self.inner.document.write()
    }

    /// Run `f` against the document mutably.
    pub fn update<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.inner.document.write())
    }

    /// Builder-style [`update`](Self::update).
    pub fn with(self, f: impl FnOnce(&mut D)) -> Self {
        self.update(f);
        self
    }

    /// true if both handles are the same allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// true if no store issued this handle
    pub fn is_detached(&self) -> bool {
        self.inner.tag.lock().is_none()
    }

    /// process-unique number, never reused
    pub(crate) fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub(crate) fn tag(&self) -> Option<HandleTag> {
        self.inner.tag.lock().clone()
    }

    pub(crate) fn holds_token(&self) -> bool {
        self.inner
            .tag
            .lock()
            .as_ref()
            .is_some_and(|tag| tag.token.is_some())
    }

    pub(crate) fn modify_tag(&self, f: impl FnOnce(&mut HandleTag)) {
        if let Some(tag) = self.inner.tag.lock().as_mut() {
            f(tag);
        }
    }
}

impl<D> Clone for Handle<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> PartialEq for Handle<D> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<D> Eq for Handle<D> {}

impl<D> fmt::Debug for Handle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.inner.tag.lock();
        let mut out = f.debug_struct("Handle");
        out.field("serial", &self.inner.serial);
        match tag.as_ref() {
            Some(tag) => out
                .field("key", &tag.key.as_str())
                .field("version", &tag.version)
                .field("locked", &tag.token.is_some()),
            None => out.field("detached", &true),
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(key: &str) -> HandleTag {
        HandleTag {
            store: StoreId::new(),
            key: DocumentKey::new(key),
            version: 3,
            token: None,
        }
    }

    #[test]
    fn test_identity_equality() {
        let a = Handle::issued(String::from("same"), tag("k"));
        let b = Handle::issued(String::from("same"), tag("k"));

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_update_visible_through_clones() {
        let a = Handle::detached(vec![1u8]);
        let b = a.clone();
        a.update(|doc| doc.push(2));
        b.write().push(3);
        assert_eq!(*a.read(), vec![1, 2, 3]);
        assert!(b.is_detached());
    }

    #[test]
    fn test_modify_tag() {
        let handle = Handle::issued((), tag("k"));
        assert!(!handle.holds_token());

        handle.modify_tag(|t| t.token = Some(LockToken::new("t1")));
        assert!(handle.holds_token());
        assert_eq!(handle.tag().map(|t| t.version), Some(3));

        // no-op on detached handles
        let detached = Handle::detached(());
        detached.modify_tag(|t| t.version = 9);
        assert!(detached.tag().is_none());
    }
}
