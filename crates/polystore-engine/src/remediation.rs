//! Journal of transactions that need manual remediation.
//!
//! A saga whose compensation failed leaves committed writes behind. Each such
//! failure is journaled here until an operator acknowledges it.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use polystore_core::{TransactionFailure, UnresolvedStep};
use serde::Serialize;
use tracing::info;

/// One transaction awaiting remediation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationEntry {
    /// Transaction id.
    pub id: String,
    /// Operation name.
    pub operation: String,
    /// When the failure was journaled.
    pub recorded_at: DateTime<Utc>,
    /// Step whose forward action failed.
    pub failed_step: String,
    /// The forward error.
    pub cause: String,
    /// Steps left committed.
    pub unresolved: Vec<UnresolvedStep>,
    /// Whether an operator has handled it.
    pub acknowledged: bool,
}

/// In-memory remediation journal.
#[derive(Debug, Default)]
pub struct RemediationJournal {
    entries: Mutex<Vec<RemediationEntry>>,
}

impl RemediationJournal {
    /// Empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal `failure`.
    pub fn record(&self, failure: &TransactionFailure) {
        let entry = RemediationEntry {
            id: failure.transaction_id.clone(),
            operation: failure.name.clone(),
            recorded_at: Utc::now(),
            failed_step: failure.failed_step.clone(),
            cause: failure.cause.to_string(),
            unresolved: failure.unresolved.clone(),
            acknowledged: false,
        };
        if let Ok(mut guard) = self.entries.lock() {
            guard.push(entry);
        }
    }

    /// Entries not yet acknowledged, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<RemediationEntry> {
        self.entries
            .lock()
            .map(|g| g.iter().filter(|e| !e.acknowledged).cloned().collect())
            .unwrap_or_default()
    }

    /// Every entry, acknowledged or not.
    #[must_use]
    pub fn all(&self) -> Vec<RemediationEntry> {
        self.entries.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Mark the entry for transaction `id` as handled. Returns whether a
    /// pending entry was found.
    pub fn acknowledge(&self, id: &str) -> bool {
        let Ok(mut guard) = self.entries.lock() else {
            return false;
        };
        let Some(entry) = guard.iter_mut().find(|e| e.id == id && !e.acknowledged) else {
            return false;
        };
        entry.acknowledged = true;
        info!(transaction_id = %id, operation = %entry.operation, "Remediation acknowledged");
        true
    }
}
