//! Caching scopes.
//!
//! An execution scope canonicalizes reads without buffering anything:
//! the first read of a key locks it on the delegate and every later read in
//! the scope returns that same handle. Writes go straight through.
//!
//! Locks still held when the scope ends are released.

mod overlay;

pub use overlay::CacheOverlay;
