// 🔁 Source sync versions
//
// Each source record carries a monotonic financial-sync version. Deleting an
// auto-posted entry leaves a tombstone at that version so the source's own
// sync job cannot recreate it; a source whose financial data changes bumps
// its version and may post again.

use crate::db::fmt_ts;
use crate::error::{LedgerError, LedgerResult};
use crate::source::SourceModule;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const INITIAL_SYNC_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub source_module: String,
    pub source_id: String,
    pub posted_version: Option<i64>,
    pub suppressed_version: Option<i64>,
    pub updated_at: String,
}

/// "No ledger entry for this source at or below this version"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTombstone {
    pub source_module: String,
    pub source_id: String,
    pub suppressed_version: i64,
}

pub struct SourceSync<'a> {
    conn: &'a Connection,
}

impl<'a> SourceSync<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SourceSync { conn }
    }

    pub fn state(&self, module: &SourceModule, source_id: &str) -> LedgerResult<Option<SyncState>> {
        let state = self
            .conn
            .query_row(
                "SELECT source_module, source_id, posted_version, suppressed_version, updated_at
                 FROM source_sync
                 WHERE source_module = ?1 AND source_id = ?2",
                params![module.as_str(), source_id],
                |row| {
                    Ok(SyncState {
                        source_module: row.get(0)?,
                        source_id: row.get(1)?,
                        posted_version: row.get(2)?,
                        suppressed_version: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(state)
    }

    /// Source jobs ask this before building a candidate entry
    pub fn should_post(&self, module: &SourceModule, source_id: &str, version: i64) -> LedgerResult<bool> {
        let suppressed = self
            .state(module, source_id)?
            .and_then(|s| s.suppressed_version);

        Ok(match suppressed {
            Some(v) => version > v,
            None => true,
        })
    }

    pub fn ensure_postable(&self, module: &SourceModule, source_id: &str, version: i64) -> LedgerResult<()> {
        if self.should_post(module, source_id, version)? {
            return Ok(());
        }

        warn!(
            source_module = module.as_str(),
            source_id,
            version,
            "re-sync of a deleted source entry refused"
        );
        Err(LedgerError::SyncSuppressed {
            source_module: module.as_str().to_string(),
            source_id: source_id.to_string(),
            version,
        })
    }

    pub fn record_posted(
        &self,
        module: &SourceModule,
        source_id: &str,
        version: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO source_sync (source_module, source_id, posted_version, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_module, source_id) DO UPDATE SET
                posted_version = max(coalesce(posted_version, 0), excluded.posted_version),
                updated_at = excluded.updated_at",
            params![module.as_str(), source_id, version, fmt_ts(now)],
        )?;
        Ok(())
    }

    /// Record a tombstone. The suppressed version never moves backwards.
    pub fn suppress(
        &self,
        module: &SourceModule,
        source_id: &str,
        version: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<SyncTombstone> {
        self.conn.execute(
            "INSERT INTO source_sync (source_module, source_id, suppressed_version, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_module, source_id) DO UPDATE SET
                suppressed_version = max(coalesce(suppressed_version, 0), excluded.suppressed_version),
                updated_at = excluded.updated_at",
            params![module.as_str(), source_id, version, fmt_ts(now)],
        )?;

        let suppressed_version = self
            .state(module, source_id)?
            .and_then(|s| s.suppressed_version)
            .unwrap_or(version);

        Ok(SyncTombstone {
            source_module: module.as_str().to_string(),
            source_id: source_id.to_string(),
            suppressed_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_unknown_source_may_post() {
        let conn = setup();
        let sync = SourceSync::new(&conn);
        assert!(sync.should_post(&SourceModule::Donation, "abc", 1).unwrap());
        assert!(sync.state(&SourceModule::Donation, "abc").unwrap().is_none());
    }

    #[test]
    fn test_tombstone_blocks_same_version() {
        let conn = setup();
        let sync = SourceSync::new(&conn);

        sync.record_posted(&SourceModule::Donation, "abc", 1, Utc::now()).unwrap();
        let tombstone = sync.suppress(&SourceModule::Donation, "abc", 1, Utc::now()).unwrap();
        assert_eq!(tombstone.suppressed_version, 1);

        assert!(!sync.should_post(&SourceModule::Donation, "abc", 1).unwrap());
        assert!(sync.should_post(&SourceModule::Donation, "abc", 2).unwrap());

        let err = sync.ensure_postable(&SourceModule::Donation, "abc", 1).unwrap_err();
        assert_eq!(err.kind(), "sync_suppressed");

        let state = sync.state(&SourceModule::Donation, "abc").unwrap().unwrap();
        assert_eq!(state.posted_version, Some(1));
    }

    #[test]
    fn test_suppressed_version_is_monotonic() {
        let conn = setup();
        let sync = SourceSync::new(&conn);

        sync.suppress(&SourceModule::Donasi, "x", 3, Utc::now()).unwrap();
        let tombstone = sync.suppress(&SourceModule::Donasi, "x", 2, Utc::now()).unwrap();

        assert_eq!(tombstone.suppressed_version, 3);
        assert!(!sync.should_post(&SourceModule::Donasi, "x", 3).unwrap());
    }
}
