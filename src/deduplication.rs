// 🔍 Auto-Posting Dedup Guard - one ledger entry per source event
// Two strategies: exact source match, then reference tag within a time window
// (the fallback covers legacy rows that never got a normalized source_id).

use crate::db::{fmt_ts, LedgerEntry};
use crate::error::LedgerResult;
use crate::source::{is_row_id, SourceModule};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

pub const DEFAULT_WINDOW_SECS: i64 = 300;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// A posted entry already carries the same (source_module, source_id)
    ExactSource,

    /// A posted entry with the same reference tag was created inside the window
    ReferenceWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub existing_entry_id: String,
    pub strategy: MatchStrategy,
    pub reason: String,
}

/// What the guard needs to know about an incoming auto-posted entry
#[derive(Debug, Clone)]
pub struct GuardCandidate<'a> {
    pub source_module: &'a SourceModule,
    pub source_id: &'a str,
    pub reference: &'a str,
    pub amount: i64,
    pub date: NaiveDate,
}

// ============================================================================
// DEDUP GUARD
// ============================================================================

#[derive(Debug, Clone)]
pub struct DedupGuard {
    /// Fallback window for reference matches (default: 5 minutes)
    pub window: Duration,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::with_window_secs(DEFAULT_WINDOW_SECS)
    }

    pub fn with_window_secs(secs: i64) -> Self {
        DedupGuard {
            window: Duration::seconds(secs),
        }
    }

    /// Look for an existing posted entry representing the same source event.
    ///
    /// Returns None without querying when the source id is not row-shaped:
    /// period postings have no single source row to protect.
    pub fn find_duplicate(
        &self,
        conn: &Connection,
        candidate: &GuardCandidate<'_>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<DuplicateMatch>> {
        if !is_row_id(candidate.source_id) {
            debug!(
                source_module = candidate.source_module.as_str(),
                source_id = candidate.source_id,
                "guard bypassed for non-row source id"
            );
            return Ok(None);
        }

        // Strategy 1: exact source match
        let exact: Option<String> = conn
            .query_row(
                "SELECT id FROM ledger_entries
                 WHERE source_module = ?1 AND source_id = ?2 AND status = 'posted'
                 LIMIT 1",
                params![candidate.source_module.as_str(), candidate.source_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_entry_id) = exact {
            debug!(existing = %existing_entry_id, "guard tripped on exact source match");
            return Ok(Some(DuplicateMatch {
                existing_entry_id,
                strategy: MatchStrategy::ExactSource,
                reason: format!(
                    "{}:{} is already posted",
                    candidate.source_module, candidate.source_id
                ),
            }));
        }

        // Strategy 2: same reference tag, created within the window
        let since = fmt_ts(now - self.window);
        let recent: Option<String> = conn
            .query_row(
                "SELECT id FROM ledger_entries
                 WHERE reference = ?1 AND status = 'posted' AND created_at >= ?2
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![candidate.reference, since],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_entry_id) = recent {
            debug!(existing = %existing_entry_id, "guard tripped on recent reference match");
            return Ok(Some(DuplicateMatch {
                existing_entry_id,
                strategy: MatchStrategy::ReferenceWindow,
                reason: format!(
                    "reference {} was posted within the last {}s",
                    candidate.reference,
                    self.window.num_seconds()
                ),
            }));
        }

        debug!(
            source_module = candidate.source_module.as_str(),
            source_id = candidate.source_id,
            amount = candidate.amount,
            date = %candidate.date,
            "guard passed"
        );
        Ok(None)
    }

    pub fn is_duplicate(
        &self,
        conn: &Connection,
        candidate: &GuardCandidate<'_>,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        Ok(self.find_duplicate(conn, candidate, now)?.is_some())
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MONITORING
// ============================================================================

/// A (source_module, source_id) pair with more than one posted entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub source_module: String,
    pub source_id: String,
    pub entry_count: i64,
    pub total_amount: i64,
}

pub fn find_duplicate_groups(conn: &Connection) -> LedgerResult<Vec<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT source_module, source_id, COUNT(*), SUM(amount)
         FROM ledger_entries
         WHERE auto_posted = 1 AND status = 'posted'
           AND source_module IS NOT NULL AND source_id IS NOT NULL
         GROUP BY source_module, source_id
         HAVING COUNT(*) > 1
         ORDER BY COUNT(*) DESC, source_module, source_id",
    )?;

    let groups = stmt
        .query_map([], |row| {
            Ok(DuplicateGroup {
                source_module: row.get(0)?,
                source_id: row.get(1)?,
                entry_count: row.get(2)?,
                total_amount: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(groups)
}

// ============================================================================
// STATS BACKSTOP
// ============================================================================

/// Drop residual duplicate auto-posted rows before aggregation.
///
/// Keyed on (source_module, source_id, amount). Manual rows pass through
/// untouched and the first occurrence of each key wins.
pub fn dedupe_for_stats(entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    let mut seen: HashSet<(String, String, i64)> = HashSet::new();

    entries
        .into_iter()
        .filter(|entry| {
            if !entry.auto_posted {
                return true;
            }
            let key = (
                entry.source_module.as_ref().map(|m| m.as_str().to_string()).unwrap_or_default(),
                entry.source_id.clone().unwrap_or_default(),
                entry.amount,
            );
            seen.insert(key)
        })
        .collect()
}
