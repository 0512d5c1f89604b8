// Ledger Sync - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod telemetry;
pub mod error;
pub mod source;         // Source modules & reference tags
pub mod db;
pub mod filters;        // Exclusion filter (savings isolation)
pub mod deduplication;  // Dedup Guard + stats backstop
pub mod sync;           // Source sync versions & tombstones
pub mod reconciliation; // Balance reconciler
pub mod entities;       // Cash accounts
pub mod ledger;         // Ledger store
pub mod stats;          // Dashboard aggregates
pub mod allocation;     // Beneficiary allocations
pub mod csv_io;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, ReconciliationWarning};
pub use source::{ReferenceTag, SourceKey, SourceModule};
pub use db::{
    Direction, EntryStatus, Event, LedgerEntry, LineItem,
    setup_database, insert_event, get_events_for_entity,
};
pub use filters::ExclusionFilter;
pub use deduplication::{DedupGuard, DuplicateMatch, MatchStrategy, DuplicateGroup};
pub use sync::{SourceSync, SyncState, SyncTombstone};
pub use reconciliation::{
    Outcome, Reconciler, ReconciliationReport, ReconciliationResult, SweepSummary,
};
pub use entities::{
    AccountRegistry, AccountStatus, AccountType, AccountUpdate, CashAccount, NewAccount,
    TypeBalance,
};
pub use ledger::{
    DeletedEntry, EntryQuery, EntryUpdate, Ledger, LedgerStore, NewEntry, NewLineItem,
};
pub use stats::{AccountStats, CategoryShare, ChartData, MonthlyPoint, StatsAggregator, Trend};
pub use allocation::{
    AllocationLedger, AllocationMode, AllocationRecord, AllocationStatistics, NewAllocation,
};
pub use csv_io::{export_entries, import_entries, ImportSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
