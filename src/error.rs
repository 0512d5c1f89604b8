// 🚨 Error taxonomy for the ledger core
//
// Validation and DuplicateEntry block a write and surface to the caller.
// Storage aborts and surfaces. ReconciliationWarning is not an error: it is
// logged and handed back next to the successful mutation.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the ledger core.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad input shape or range (amount <= 0, empty category, unknown direction...)
    #[error("validation failed: {0}")]
    Validation(String),

    /// The Dedup Guard tripped. Callers must not retry automatically.
    #[error("duplicate entry for {source_module}:{source_id}")]
    DuplicateEntry {
        source_module: String,
        source_id: String,
    },

    /// Closing an account that still has posted entries attributed to it
    #[error("account {account_id} still has {entry_count} posted entries")]
    AccountInUse {
        account_id: String,
        entry_count: i64,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The source record was deleted from the ledger at this version or later
    #[error("{source_module}:{source_id} was removed from the ledger at version {version}")]
    SyncSuppressed {
        source_module: String,
        source_id: String,
        version: i64,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Short machine-readable kind, used by the HTTP layer and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::DuplicateEntry { .. } => "duplicate_entry",
            LedgerError::AccountInUse { .. } => "account_in_use",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::SyncSuppressed { .. } => "sync_suppressed",
            LedgerError::Storage(_) | LedgerError::Serialization(_) => "storage_error",
        }
    }
}

// ============================================================================
// RECONCILIATION WARNING
// ============================================================================

/// Non-fatal reconciliation failure.
///
/// The triggering mutation is kept; the cached balance stays stale until the
/// next reconcile (manual refresh or periodic sweep).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationWarning {
    pub account_id: String,
    pub cause: String,
}

impl ReconciliationWarning {
    pub fn new(account_id: &str, cause: impl ToString) -> Self {
        ReconciliationWarning {
            account_id: account_id.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl std::fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reconciliation of account {} failed: {}",
            self.account_id, self.cause
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let dup = LedgerError::DuplicateEntry {
            source_module: "donation".to_string(),
            source_id: "abc-123".to_string(),
        };
        assert_eq!(dup.kind(), "duplicate_entry");
        assert_eq!(dup.to_string(), "duplicate entry for donation:abc-123");

        let in_use = LedgerError::AccountInUse {
            account_id: "acc-1".to_string(),
            entry_count: 3,
        };
        assert_eq!(in_use.kind(), "account_in_use");

        assert_eq!(LedgerError::validation("amount").kind(), "validation_error");
        assert_eq!(LedgerError::not_found("entry", "x").to_string(), "entry not found: x");
    }

    #[test]
    fn test_storage_error_from_rusqlite() {
        let err: LedgerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), "storage_error");
    }

    #[test]
    fn test_reconciliation_warning_display() {
        let warning = ReconciliationWarning::new("acc-9", "database is locked");
        assert_eq!(
            warning.to_string(),
            "reconciliation of account acc-9 failed: database is locked"
        );
    }
}
