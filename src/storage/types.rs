//! core identifier types for the storage layer.
//!
//! Keys and lock tokens are plain strings on the outside; the newtypes keep
//! them from being mixed up. Key generation goes through [`KeyGenerator`] so
//! tests and embedders can swap the default ULID supplier.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// A document key.
///
/// Any non-structured string is accepted. Keys requested without an explicit
/// value come from the store's [`KeyGenerator`] and are roughly time ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// create a key from any string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a key from the process-wide default generator.
    pub fn generate() -> Self {
        default_key_generator().next_key()
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocumentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for DocumentKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Opaque token identifying the holder of a pessimistic lock.
///
/// Compared by value; every `lock` call mints a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// identifies the store instance that issued a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(Ulid);

impl StoreId {
    pub(crate) fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// Supplier of globally unique, roughly time-ordered identifiers.
///
/// Used for fresh document keys and for lock tokens.
pub trait KeyGenerator: Send + Sync {
    /// next identifier as a string
    fn next_id(&self) -> String;

    /// next identifier wrapped as a document key
    fn next_key(&self) -> DocumentKey {
        DocumentKey(self.next_id())
    }
}

/// Monotonic lowercase ULIDs.
pub struct UlidGenerator {
    inner: Mutex<Generator>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for UlidGenerator {
    fn next_id(&self) -> String {
        // the monotonic generator only fails when the random part overflows
        // inside a single millisecond
        let ulid = self.inner.lock().generate().unwrap_or_else(|_| Ulid::new());
        ulid.to_string().to_lowercase()
    }
}

/// `{prefix}-{n}` identifiers from a counter. Deterministic, handy in tests.
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl KeyGenerator for SequentialGenerator {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:020}", self.prefix, n)
    }
}

fn default_slot() -> &'static RwLock<Arc<dyn KeyGenerator>> {
    static DEFAULT: OnceLock<RwLock<Arc<dyn KeyGenerator>>> = OnceLock::new();
    DEFAULT.get_or_init(|| RwLock::new(Arc::new(UlidGenerator::new())))
}

/// The process-wide default generator (a [`UlidGenerator`] unless replaced).
///
/// Stores capture the generator at construction; replacing the default does
/// not affect stores that already exist.
pub fn default_key_generator() -> Arc<dyn KeyGenerator> {
    default_slot().read().clone()
}

/// Replace the process-wide default generator, returning the previous one.
pub fn set_default_key_generator(generator: Arc<dyn KeyGenerator>) -> Arc<dyn KeyGenerator> {
    std::mem::replace(&mut *default_slot().write(), generator)
}
