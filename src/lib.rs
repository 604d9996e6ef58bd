//! docstore - An embedded in-memory document store
//!
//! Documents live under string keys with a version that advances on every
//! put. Writers either check versions optimistically or take a fail-fast,
//! expiring lock on the key. On top of the base store, transactional scopes
//! buffer writes until commit and caching scopes canonicalize reads.
//!
//! # Example
//!
//! ```
//! use docstore::{DocumentKey, DocumentStore, JsonDocument, MemoryStore, StoreExt};
//!
//! let store: MemoryStore<JsonDocument> = MemoryStore::new();
//! let alice = DocumentKey::new("alice");
//! let bob = DocumentKey::new("bob");
//!
//! store.transact(|tx| {
//!     let a = tx.get(&alice)?.with(|doc| {
//!         doc.set("balance", 100);
//!     });
//!     let b = tx.get(&bob)?.with(|doc| {
//!         doc.set("balance", 50);
//!     });
//!     tx.put(&a)?;
//!     tx.put(&b)
//! })?;
//!
//! let balance = store.get(&alice)?.read().get("balance").cloned();
//! assert_eq!(balance, Some(serde_json::json!(100)));
//! # Ok::<(), docstore::StoreError>(())
//! ```

pub mod cache;
pub mod storage;
pub mod store;
pub mod transaction;

pub use cache::CacheOverlay;
pub use storage::{
    Document, DocumentError, DocumentKey, Handle, JsonDocument, KeyGenerator, MemoryStore,
    RawDocument, StoreError, StoreResult, StoreStats, UlidGenerator,
};
pub use store::{DocumentStore, StoreConfig, StoreExt};
pub use transaction::{TransactionInfo, TransactionOverlay};
