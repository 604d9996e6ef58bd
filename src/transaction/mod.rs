//! Transactional scopes.
//!
//! A transaction locks every key it reads, buffers every write and applies
//! the buffer on commit. Transactions started inside a transaction join it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionOverlay                        │
//! │  (canonical locked reads, buffered puts/deletes, commit)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┴─────────────────────┐
//!        │                                           │
//!        ▼                                           ▼
//!  ┌─────────────────────┐                 ┌─────────────────────┐
//!  │     delegate        │                 │ TransactionRegistry │
//!  │ (base or overlay)   │                 │  (active tx by id)  │
//!  └─────────────────────┘                 └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use docstore::{DocumentKey, DocumentStore, JsonDocument, MemoryStore, StoreExt};
//!
//! let store: MemoryStore<JsonDocument> = MemoryStore::new();
//! let key = DocumentKey::new("counter");
//!
//! store.transact(|tx| {
//!     let counter = tx.get(&key)?;
//!     counter.update(|doc| {
//!         let next = doc.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
//!         doc.set("n", next);
//!     });
//!     tx.put(&counter)
//! })?;
//! # Ok::<(), docstore::StoreError>(())
//! ```

mod context;
mod manager;

pub use context::TransactionOverlay;
pub use manager::{TransactionInfo, TransactionRegistry};
