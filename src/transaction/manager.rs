//! Transaction registry - tracks the transactions running against a store.
//!
//! Every base store owns one registry; overlays hand out their delegate's,
//! so a transaction nested under a cache scope still shows up on the base.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use ulid::Ulid;

/// Metadata for a running transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    /// Unique transaction ID.
    pub id: String,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

/// Active transactions tracked by ID.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    active: RwLock<HashMap<String, TransactionInfo>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transaction and return its metadata.
    pub(crate) fn begin(&self) -> TransactionInfo {
        let info = TransactionInfo {
            id: Ulid::new().to_string().to_lowercase(),
            started_at: Utc::now(),
        };
        self.active.write().insert(info.id.clone(), info.clone());
        info
    }

    /// Mark a transaction as completed (committed or rolled back).
    pub(crate) fn finish(&self, id: &str) {
        self.active.write().remove(id);
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// List all active transactions, oldest first.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        let mut active: Vec<_> = self.active.read().values().cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, id: &str) -> bool {
        self.active.read().contains_key(id)
    }

    /// Get metadata for an active transaction.
    pub fn get(&self, id: &str) -> Option<TransactionInfo> {
        self.active.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_finish() {
        let registry = TransactionRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let tx1 = registry.begin();
        let tx2 = registry.begin();
        assert_eq!(registry.active_count(), 2);
        assert!(registry.is_active(&tx1.id));
        assert_eq!(registry.get(&tx2.id), Some(tx2.clone()));

        registry.finish(&tx1.id);
        assert!(!registry.is_active(&tx1.id));
        assert_eq!(registry.active_transactions(), vec![tx2.clone()]);

        // finishing twice is harmless
        registry.finish(&tx1.id);
        registry.finish(&tx2.id);
        assert_eq!(registry.active_count(), 0);
    }
}
