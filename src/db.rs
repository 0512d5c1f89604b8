// 🗄️ Storage layer - SQLite schema, ledger entry model, audit trail
//
// The backing store provides row-level consistency; every multi-row write in
// this crate runs inside a rusqlite transaction.

use crate::error::{LedgerError, LedgerResult};
use crate::source::SourceModule;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// DIRECTION & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Income => "Income",
            Direction::Expense => "Expense",
        }
    }

    /// Sign applied to the amount when computing a balance
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Income => 1,
            Direction::Expense => -1,
        }
    }
}

impl FromStr for Direction {
    type Err = LedgerError;

    /// Accepts the stored names and the legacy Indonesian labels
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" | "pemasukan" => Ok(Direction::Income),
            "expense" | "pengeluaran" => Ok(Direction::Expense),
            other => Err(LedgerError::validation(format!(
                "unknown direction '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Verified,
    Posted,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Verified => "verified",
            EntryStatus::Posted => "posted",
            EntryStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(EntryStatus::Draft),
            "verified" => Ok(EntryStatus::Verified),
            "posted" => Ok(EntryStatus::Posted),
            "cancelled" => Ok(EntryStatus::Cancelled),
            other => Err(LedgerError::validation(format!("unknown status '{}'", other))),
        }
    }
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

/// A single recorded income or expense movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub direction: Direction,
    pub category: String,
    pub subcategory: Option<String>,

    /// Positive amount in the smallest currency unit
    pub amount: i64,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub counterparty: Option<String>,
    pub account_id: Option<String>,
    pub status: EntryStatus,

    // ========================================================================
    // SOURCE LINK (typed pair is primary; reference is display/migration only)
    // ========================================================================
    pub auto_posted: bool,
    pub source_module: Option<SourceModule>,
    pub source_id: Option<String>,
    pub reference: Option<String>,

    /// Version of the source record this entry was generated from
    pub sync_version: Option<i64>,

    // ========================================================================
    // AUDIT
    // ========================================================================
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl LedgerEntry {
    /// Signed contribution to an account balance
    pub fn signed_amount(&self) -> i64 {
        self.direction.sign() * self.amount
    }

    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }
}

/// Idempotency hash for the store-level UNIQUE backstop.
/// This is for DEDUPLICATION, not identity.
pub fn idempotency_hash(source_module: &SourceModule, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", source_module.as_str(), source_id));
    format!("{:x}", hasher.finalize())
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so they compare lexically
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn conversion_error(err: LedgerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
}

/// Column list matching `entry_from_row`
pub const ENTRY_COLUMNS: &str = "e.id, e.direction, e.category, e.subcategory, e.amount, e.date,
    e.description, e.counterparty, e.account_id, e.status, e.auto_posted,
    e.source_module, e.source_id, e.reference, e.sync_version,
    e.created_at, e.updated_at, e.created_by, e.updated_by";

pub fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let direction: String = row.get(1)?;
    let date: String = row.get(5)?;
    let status: String = row.get(9)?;
    let source_module: Option<String> = row.get(11)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        direction: direction.parse().map_err(conversion_error)?,
        category: row.get(2)?,
        subcategory: row.get(3)?,
        amount: row.get(4)?,
        date: parse_date(&date)?,
        description: row.get(6)?,
        counterparty: row.get(7)?,
        account_id: row.get(8)?,
        status: status.parse().map_err(conversion_error)?,
        auto_posted: row.get(10)?,
        source_module: source_module.map(SourceModule::from),
        source_id: row.get(12)?,
        reference: row.get(13)?,
        sync_version: row.get(14)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        created_by: row.get(17)?,
        updated_by: row.get(18)?,
    })
}

/// Persist a fully-built entry. `hash` is None for manual or period-keyed entries.
pub fn insert_entry_row(conn: &Connection, entry: &LedgerEntry, hash: Option<&str>) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO ledger_entries (
            id, direction, category, subcategory, amount, date, description,
            counterparty, account_id, status, auto_posted, source_module, source_id,
            reference, sync_version, idempotency_hash, created_at, updated_at,
            created_by, updated_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            entry.id,
            entry.direction.as_str(),
            entry.category,
            entry.subcategory,
            entry.amount,
            fmt_date(entry.date),
            entry.description,
            entry.counterparty,
            entry.account_id,
            entry.status.as_str(),
            entry.auto_posted,
            entry.source_module.as_ref().map(|m| m.as_str().to_string()),
            entry.source_id,
            entry.reference,
            entry.sync_version,
            hash,
            fmt_ts(entry.created_at),
            fmt_ts(entry.updated_at),
            entry.created_by,
            entry.updated_by,
        ],
    )
}

pub fn get_entry(conn: &Connection, id: &str) -> LedgerResult<LedgerEntry> {
    let sql = format!("SELECT {} FROM ledger_entries e WHERE e.id = ?1", ENTRY_COLUMNS);
    match conn.query_row(&sql, [id], entry_from_row) {
        Ok(entry) => Ok(entry),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(LedgerError::not_found("ledger entry", id)),
        Err(e) => Err(e.into()),
    }
}

/// UNIQUE only; CHECK and FOREIGN KEY failures are not duplicates
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ============================================================================
// LINE ITEMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub ledger_entry_id: String,
    pub item_name: String,
    pub quantity: i64,
    pub unit: Option<String>,
    pub unit_price: i64,
}

impl LineItem {
    /// Derived, never stored independently. Overflow is rejected when the
    /// item is added, so a stored item always has a total.
    pub fn total(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail row: every mutation is an event
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> LedgerResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            fmt_ts(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_entity(conn: &Connection, entity_id: &str) -> LedgerResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_id = ?1
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map([entity_id], |row| {
            let timestamp: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_ts(&timestamp)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> LedgerResult<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cash_accounts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            account_type TEXT NOT NULL,
            opening_balance INTEGER NOT NULL DEFAULT 0,
            current_balance INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            is_default INTEGER NOT NULL DEFAULT 0,
            managed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            direction TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT,
            amount INTEGER NOT NULL CHECK (amount > 0),
            date TEXT NOT NULL,
            description TEXT,
            counterparty TEXT,
            account_id TEXT REFERENCES cash_accounts(id),
            status TEXT NOT NULL,
            auto_posted INTEGER NOT NULL DEFAULT 0,
            source_module TEXT,
            source_id TEXT,
            reference TEXT,
            sync_version INTEGER,
            idempotency_hash TEXT UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            created_by TEXT,
            updated_by TEXT
        );

        CREATE TABLE IF NOT EXISTS line_items (
            id TEXT PRIMARY KEY,
            ledger_entry_id TEXT NOT NULL REFERENCES ledger_entries(id) ON DELETE CASCADE,
            item_name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit TEXT,
            unit_price INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS allocations (
            id TEXT PRIMARY KEY,
            ledger_entry_id TEXT NOT NULL REFERENCES ledger_entries(id) ON DELETE CASCADE,
            beneficiary_id TEXT NOT NULL,
            allocated_amount INTEGER NOT NULL CHECK (allocated_amount > 0),
            percentage REAL NOT NULL,
            assistance_type TEXT NOT NULL,
            period TEXT NOT NULL,
            note TEXT,
            allocation_mode TEXT NOT NULL DEFAULT 'direct',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS source_sync (
            source_module TEXT NOT NULL,
            source_id TEXT NOT NULL,
            posted_version INTEGER,
            suppressed_version INTEGER,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (source_module, source_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_account ON ledger_entries(account_id);
        CREATE INDEX IF NOT EXISTS idx_entries_date ON ledger_entries(date);
        CREATE INDEX IF NOT EXISTS idx_entries_source ON ledger_entries(source_module, source_id);
        CREATE INDEX IF NOT EXISTS idx_entries_reference ON ledger_entries(reference, created_at);
        CREATE INDEX IF NOT EXISTS idx_allocations_entry ON allocations(ledger_entry_id);
        CREATE INDEX IF NOT EXISTS idx_allocations_beneficiary ON allocations(beneficiary_id, period);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )?;

    Ok(())
}
