//! Store contract and configuration.
//!
//! # Architecture
//!
//! ```text
//!        caller
//!          │  transact / execute
//!          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │TransactionOverlay│ ───▶ │   CacheOverlay   │   (either may wrap the other,
//! │ (buffer, commit) │      │ (identity map)   │    or the base directly)
//! └──────────────────┘      └──────────────────┘
//!          │                         │
//!          └────────────┬────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   MemoryStore   │
//!              │ (records, TTL   │
//!              │  locks, shards) │
//!              └─────────────────┘
//! ```
//!
//! All three implement [`DocumentStore`].

mod config;
mod contract;

pub use config::{StoreConfig, DEFAULT_LOCK_TTL_SECS, DEFAULT_SHARDS};
pub use contract::{DocumentStore, ScopeBody, StoreExt};
