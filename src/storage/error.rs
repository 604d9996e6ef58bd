//! Store error types
//!
//! Every store operation (base store and overlays alike) fails with a
//! [`StoreError`]. We use `thiserror` for the definitions.

use thiserror::Error;

use crate::storage::document::DocumentError;
use crate::storage::types::DocumentKey;

/// the main error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// the handle's version does not match the stored record, or an insert
    /// targeted an occupied key
    #[error("version conflict on {key}: handle is at version {expected}, store is at {actual}")]
    VersionConflict {
        key: DocumentKey,
        expected: u64,
        actual: u64,
    },

    /// the key is locked by someone else
    #[error("lock conflict on {key}: not the lock holder")]
    LockConflict { key: DocumentKey },

    /// a transaction was handed a handle it did not issue
    #[error("handle is not a member of this transaction")]
    MembershipViolation,

    /// the store never issued this handle
    #[error("unknown handle: not issued by this store")]
    UnknownHandle,

    /// payload encoding or decoding failed
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// raised by caller code inside a scope body
    #[error("scope aborted: {0}")]
    Aborted(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Build an [`Aborted`](StoreError::Aborted) error from any message.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    /// check if this error is a version or lock conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::LockConflict { .. }
        )
    }

    /// check if re-fetching and retrying may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// the key involved, for the variants that carry one
    pub fn key(&self) -> Option<&DocumentKey> {
        match self {
            StoreError::VersionConflict { key, .. } | StoreError::LockConflict { key } => Some(key),
            _ => None,
        }
    }
}

/// result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
