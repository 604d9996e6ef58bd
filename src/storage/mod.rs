//! storage layer for docstore
//!
//! this module owns the authoritative record table and everything a record
//! is made of: keys, handles, documents and the clock lock expiry is
//! measured against. The overlays never touch records directly; they go
//! through the [`DocumentStore`](crate::store::DocumentStore) contract.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │   (sharded records, version checks, TTL locks, registry)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   handle    │       │  document   │       │    types    │
//!  │ (tag, doc)  │       │  (payload)  │       │ (keys, ids) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!                              │
//!                              ▼
//!                        ┌─────────────┐
//!                        │    clock    │
//!                        │ (lock TTL)  │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use docstore::storage::{DocumentKey, JsonDocument, MemoryStore, StoreError};
//! use docstore::DocumentStore;
//!
//! let store: MemoryStore<JsonDocument> = MemoryStore::new();
//! let key = DocumentKey::new("alice");
//!
//! // a never-stored key reads as an empty version-0 document
//! let alice = store.get(&key)?;
//! alice.update(|doc| {
//!     doc.set("age", 30);
//! });
//! store.put(&alice)?;
//!
//! // a second insert over the same key is a version conflict
//! let stale = store.new_instance(Some(key.clone()));
//! assert!(matches!(store.put(&stale), Err(StoreError::VersionConflict { .. })));
//! # Ok::<(), StoreError>(())
//! ```

mod clock;
mod document;
mod error;
mod handle;
mod memory;
mod types;

// Re-export public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{Document, DocumentError, DocumentResult, JsonDocument, RawDocument};
pub use error::{StoreError, StoreResult};
pub use handle::Handle;
pub use memory::{MemoryStore, StoreStats};
pub use types::{
    default_key_generator, set_default_key_generator, DocumentKey, KeyGenerator, LockToken,
    SequentialGenerator, StoreId, UlidGenerator,
};
