// 📒 Ledger Store - insert/query path and the `Ledger` facade
//
// insert: validate → classify reference → sync-version check → Dedup Guard →
// persist + audit event (one transaction) → commit → reconcile the account.
// The commit happens before the reconcile reads the entry set.

use crate::allocation::AllocationLedger;
use crate::config::LedgerConfig;
use crate::db::{
    self, fmt_date, fmt_ts, get_entry, idempotency_hash, insert_entry_row, insert_event, is_unique_violation,
    Direction, EntryStatus, Event, LedgerEntry, LineItem,
};
use crate::deduplication::{find_duplicate_groups, DedupGuard, DuplicateGroup, GuardCandidate};
use crate::entities::AccountRegistry;
use crate::error::{LedgerError, LedgerResult};
use crate::filters::ExclusionFilter;
use crate::reconciliation::{Outcome, Reconciler};
use crate::source::{is_row_id, ReferenceTag, SourceKey, SourceModule};
use crate::stats::StatsAggregator;
use crate::sync::{SourceSync, SyncTombstone, INITIAL_SYNC_VERSION};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const SYSTEM_ACTOR: &str = "system";

// ============================================================================
// INPUTS
// ============================================================================

/// Candidate entry, from a manual form or a source-module auto-post call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub direction: Direction,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub amount: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,

    /// Display reference; parsed into `source` when it has a `module:` prefix
    #[serde(default)]
    pub reference: Option<String>,

    /// Ignored for auto-posted entries, which are always posted
    #[serde(default)]
    pub status: Option<EntryStatus>,

    #[serde(default)]
    pub sync_version: Option<i64>,

    #[serde(default)]
    pub actor: Option<String>,

    #[serde(skip)]
    pub source: Option<ReferenceTag>,
}

impl NewEntry {
    pub fn new(direction: Direction, category: &str, amount: i64, date: NaiveDate) -> Self {
        NewEntry {
            direction,
            category: category.to_string(),
            subcategory: None,
            amount,
            date,
            account_id: None,
            description: None,
            counterparty: None,
            reference: None,
            status: None,
            sync_version: None,
            actor: None,
            source: None,
        }
    }

    pub fn account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn counterparty(mut self, counterparty: &str) -> Self {
        self.counterparty = Some(counterparty.to_string());
        self
    }

    pub fn subcategory(mut self, subcategory: &str) -> Self {
        self.subcategory = Some(subcategory.to_string());
        self
    }

    /// Free-text or `module:id` reference
    pub fn reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self.source = ReferenceTag::parse(reference);
        self
    }

    /// Typed source link; the display reference is derived from it
    pub fn source(mut self, module: SourceModule, key: SourceKey) -> Self {
        let tag = ReferenceTag::new(module, key);
        self.reference = Some(tag.to_string());
        self.source = Some(tag);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn sync_version(mut self, version: i64) -> Self {
        self.sync_version = Some(version);
        self
    }

    pub fn actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    /// Typed link, falling back to parsing the reference (deserialized input)
    fn resolved_source(&self) -> Option<ReferenceTag> {
        self.source
            .clone()
            .or_else(|| self.reference.as_deref().and_then(ReferenceTag::parse))
    }
}

/// Filtered listing parameters. Date bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryQuery {
    pub account_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category: Option<String>,
    pub direction: Option<Direction>,
    pub status: Option<EntryStatus>,
    pub limit: Option<usize>,
}

impl EntryQuery {
    pub fn posted() -> Self {
        EntryQuery {
            status: Some(EntryStatus::Posted),
            ..Default::default()
        }
    }

    pub(crate) fn conditions(&self) -> (Vec<String>, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(account_id) = &self.account_id {
            conditions.push("e.account_id = ?".to_string());
            values.push(Value::Text(account_id.clone()));
        }
        if let Some(from) = self.from {
            conditions.push("e.date >= ?".to_string());
            values.push(Value::Text(fmt_date(from)));
        }
        if let Some(to) = self.to {
            conditions.push("e.date <= ?".to_string());
            values.push(Value::Text(fmt_date(to)));
        }
        if let Some(category) = &self.category {
            conditions.push("e.category = ?".to_string());
            values.push(Value::Text(category.clone()));
        }
        if let Some(direction) = self.direction {
            conditions.push("e.direction = ?".to_string());
            values.push(Value::Text(direction.as_str().to_string()));
        }
        if let Some(status) = self.status {
            conditions.push("e.status = ?".to_string());
            values.push(Value::Text(status.as_str().to_string()));
        }

        (conditions, values)
    }
}

/// Manual edit; None leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub direction: Option<Direction>,
    pub category: Option<String>,
    pub subcategory: Option<Option<String>>,
    pub amount: Option<i64>,
    pub date: Option<NaiveDate>,
    pub description: Option<Option<String>>,
    pub counterparty: Option<Option<String>>,
    pub account_id: Option<Option<String>>,
    pub status: Option<EntryStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub item_name: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit: Option<String>,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedEntry {
    pub entry: LedgerEntry,
    pub tombstone: Option<SyncTombstone>,
}

fn validate_amount_and_category(amount: i64, category: &str) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::validation(format!("amount must be positive, got {}", amount)));
    }
    if category.trim().is_empty() {
        return Err(LedgerError::validation("category is required"));
    }
    Ok(())
}

// ============================================================================
// LEDGER FACADE
// ============================================================================

/// Owns the connection and the single shared exclusion filter.
/// Components are borrowed views over both.
pub struct Ledger {
    conn: Connection,
    config: LedgerConfig,
    filter: ExclusionFilter,
    guard: DedupGuard,
}

impl Ledger {
    pub fn from_connection(conn: Connection, config: LedgerConfig) -> LedgerResult<Self> {
        db::setup_database(&conn)?;
        let filter = ExclusionFilter::from_config(&config);
        let guard = DedupGuard::with_window_secs(config.dedup_window_secs);

        Ok(Ledger {
            conn,
            config,
            filter,
            guard,
        })
    }

    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        let conn = Connection::open(&config.database_path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: LedgerConfig) -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn filter(&self) -> &ExclusionFilter {
        &self.filter
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn store(&self) -> LedgerStore<'_> {
        LedgerStore::new(&self.conn, &self.filter, &self.guard)
    }

    pub fn accounts(&self) -> AccountRegistry<'_> {
        AccountRegistry::new(&self.conn, &self.filter)
    }

    pub fn stats(&self) -> StatsAggregator<'_> {
        StatsAggregator::new(&self.conn, &self.filter, self.config.chart_months)
    }

    pub fn allocations(&self) -> AllocationLedger<'_> {
        AllocationLedger::new(&self.conn)
    }

    pub fn sync(&self) -> SourceSync<'_> {
        SourceSync::new(&self.conn)
    }
}

// ============================================================================
// LEDGER STORE
// ============================================================================

pub struct LedgerStore<'a> {
    conn: &'a Connection,
    filter: &'a ExclusionFilter,
    guard: &'a DedupGuard,
}

impl<'a> LedgerStore<'a> {
    pub fn new(conn: &'a Connection, filter: &'a ExclusionFilter, guard: &'a DedupGuard) -> Self {
        LedgerStore { conn, filter, guard }
    }

    fn reconciler(&self) -> Reconciler<'a> {
        Reconciler::new(self.conn, self.filter)
    }

    /// Entries may only be attributed to existing, non-closed accounts
    fn ensure_usable_account(&self, account_id: &str) -> LedgerResult<()> {
        let status: Option<String> = self
            .conn
            .query_row("SELECT status FROM cash_accounts WHERE id = ?1", [account_id], |row| row.get(0))
            .optional()?;

        match status.as_deref() {
            None => Err(LedgerError::validation(format!("unknown account '{}'", account_id))),
            Some("closed") => Err(LedgerError::validation(format!("account '{}' is closed", account_id))),
            Some(_) => Ok(()),
        }
    }

    // ========================================================================
    // INSERT
    // ========================================================================

    pub fn insert(&self, new: NewEntry) -> LedgerResult<Outcome<LedgerEntry>> {
        self.insert_at(new, Utc::now())
    }

    /// Insert with an explicit clock (the guard window is measured from `now`)
    pub fn insert_at(&self, new: NewEntry, now: DateTime<Utc>) -> LedgerResult<Outcome<LedgerEntry>> {
        validate_amount_and_category(new.amount, &new.category)?;
        if let Some(account_id) = &new.account_id {
            self.ensure_usable_account(account_id)?;
        }

        let source = new.resolved_source();
        let auto_posted = source.as_ref().map(ReferenceTag::is_auto_posted).unwrap_or(false);

        // auto-posted entries are always posted, whatever the caller asked for
        let status = if auto_posted {
            EntryStatus::Posted
        } else {
            new.status.unwrap_or(EntryStatus::Posted)
        };

        let sync_version = if auto_posted {
            let version = new.sync_version.unwrap_or(INITIAL_SYNC_VERSION);
            if version < INITIAL_SYNC_VERSION {
                return Err(LedgerError::validation("sync_version must be at least 1"));
            }
            Some(version)
        } else {
            None
        };

        let reference = new
            .reference
            .clone()
            .or_else(|| source.as_ref().map(ReferenceTag::to_string));
        let actor = new.actor.clone().unwrap_or_else(|| {
            if auto_posted { SYSTEM_ACTOR.to_string() } else { "manual".to_string() }
        });

        let tx = self.conn.unchecked_transaction()?;
        let mut hash = None;

        if let (Some(tag), Some(version)) = (source.as_ref(), sync_version) {
            let source_id = tag.key.as_str();
            // period labels have no single source row to version or tombstone
            if tag.key.is_row() {
                SourceSync::new(&tx).ensure_postable(&tag.module, source_id, version)?;
            }

            if tag.is_guarded() {
                let candidate = GuardCandidate {
                    source_module: &tag.module,
                    source_id,
                    reference: reference.as_deref().unwrap_or_default(),
                    amount: new.amount,
                    date: new.date,
                };

                if let Some(found) = self.guard.find_duplicate(&tx, &candidate, now)? {
                    info!(existing = %found.existing_entry_id, reason = %found.reason, "duplicate auto-post rejected");
                    return Err(LedgerError::DuplicateEntry {
                        source_module: tag.module.as_str().to_string(),
                        source_id: source_id.to_string(),
                    });
                }
                hash = Some(idempotency_hash(&tag.module, source_id));
            }
        }

        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            direction: new.direction,
            category: new.category.trim().to_string(),
            subcategory: new.subcategory,
            amount: new.amount,
            date: new.date,
            description: new.description,
            counterparty: new.counterparty,
            account_id: new.account_id,
            status,
            auto_posted,
            source_module: source.as_ref().map(|t| t.module.clone()),
            source_id: source.as_ref().map(|t| t.key.as_str().to_string()),
            reference,
            sync_version,
            created_at: now,
            updated_at: now,
            created_by: Some(actor.clone()),
            updated_by: None,
        };

        insert_entry_row(&tx, &entry, hash.as_deref()).map_err(|err| {
            match (is_unique_violation(&err), &entry.source_module, &entry.source_id) {
                (true, Some(module), Some(source_id)) if hash.is_some() => LedgerError::DuplicateEntry {
                    source_module: module.as_str().to_string(),
                    source_id: source_id.clone(),
                },
                _ => LedgerError::from(err),
            }
        })?;

        if let (Some(tag), Some(version)) = (source.as_ref().filter(|t| t.key.is_row()), sync_version) {
            SourceSync::new(&tx).record_posted(&tag.module, tag.key.as_str(), version, now)?;
        }

        insert_event(
            &tx,
            &Event::new(
                if auto_posted { "entry_auto_posted" } else { "entry_created" },
                "ledger_entry",
                &entry.id,
                serde_json::to_value(&entry)?,
                &actor,
            ),
        )?;
        tx.commit()?;

        info!(
            entry_id = %entry.id,
            direction = entry.direction.as_str(),
            amount = entry.amount,
            auto_posted,
            reference = entry.reference.as_deref().unwrap_or(""),
            "ledger entry recorded"
        );

        let warning = match (&entry.account_id, entry.is_posted()) {
            (Some(account_id), true) => self.reconciler().reconcile_or_warn(account_id),
            _ => None,
        };

        Ok(Outcome { value: entry, warning })
    }

    // ========================================================================
    // QUERY
    // ========================================================================

    pub fn get(&self, id: &str) -> LedgerResult<LedgerEntry> {
        get_entry(self.conn, id)
    }

    /// Visible entries only. Ordered by date desc, created_at desc.
    pub fn list(&self, query: &EntryQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let (conditions, values) = query.conditions();
        let mut entries = self.filter.select_visible(self.conn, &conditions, values)?;

        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    /// Edit a manual entry. Auto-posted entries only accept `sync_date`.
    pub fn update(&self, id: &str, update: EntryUpdate, actor: &str) -> LedgerResult<Outcome<LedgerEntry>> {
        let before = self.get(id)?;
        if before.auto_posted {
            return Err(LedgerError::validation(
                "auto-posted entries are immutable except for their date",
            ));
        }

        let mut after = before.clone();
        if let Some(direction) = update.direction {
            after.direction = direction;
        }
        if let Some(category) = update.category {
            after.category = category.trim().to_string();
        }
        if let Some(subcategory) = update.subcategory {
            after.subcategory = subcategory;
        }
        if let Some(amount) = update.amount {
            after.amount = amount;
        }
        if let Some(date) = update.date {
            after.date = date;
        }
        if let Some(description) = update.description {
            after.description = description;
        }
        if let Some(counterparty) = update.counterparty {
            after.counterparty = counterparty;
        }
        if let Some(account_id) = update.account_id {
            after.account_id = account_id;
        }
        if let Some(status) = update.status {
            after.status = status;
        }

        validate_amount_and_category(after.amount, &after.category)?;
        if after.account_id != before.account_id {
            if let Some(account_id) = &after.account_id {
                self.ensure_usable_account(account_id)?;
            }
        }

        let now = Utc::now();
        after.updated_at = now;
        after.updated_by = Some(actor.to_string());

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE ledger_entries
             SET direction = ?1, category = ?2, subcategory = ?3, amount = ?4, date = ?5,
                 description = ?6, counterparty = ?7, account_id = ?8, status = ?9,
                 updated_at = ?10, updated_by = ?11
             WHERE id = ?12",
            params![
                after.direction.as_str(),
                after.category,
                after.subcategory,
                after.amount,
                fmt_date(after.date),
                after.description,
                after.counterparty,
                after.account_id,
                after.status.as_str(),
                fmt_ts(now),
                actor,
                id
            ],
        )?;
        insert_event(
            &tx,
            &Event::new(
                "entry_updated",
                "ledger_entry",
                id,
                serde_json::json!({ "before": before, "after": after }),
                actor,
            ),
        )?;
        tx.commit()?;

        debug!(entry_id = id, "manual entry updated");

        let warnings = self.reconcile_affected(&[&before, &after]);
        Ok(Outcome::with_warnings(after, warnings))
    }

    /// Reconcile every account a posted version of the entry touched
    fn reconcile_affected(&self, versions: &[&LedgerEntry]) -> Vec<crate::error::ReconciliationWarning> {
        let mut accounts: Vec<&str> = versions
            .iter()
            .filter(|e| e.is_posted())
            .filter_map(|e| e.account_id.as_deref())
            .collect();
        accounts.dedup();

        let reconciler = self.reconciler();
        accounts
            .into_iter()
            .filter_map(|account_id| reconciler.reconcile_or_warn(account_id))
            .collect()
    }

    /// The narrow date-sync path. Dates never move balances, so no reconcile.
    pub fn sync_date(&self, id: &str, date: NaiveDate, actor: &str) -> LedgerResult<LedgerEntry> {
        let before = self.get(id)?;
        let now = Utc::now();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE ledger_entries SET date = ?1, updated_at = ?2, updated_by = ?3 WHERE id = ?4",
            params![fmt_date(date), fmt_ts(now), actor, id],
        )?;
        insert_event(
            &tx,
            &Event::new(
                "entry_date_synced",
                "ledger_entry",
                id,
                serde_json::json!({ "from": fmt_date(before.date), "to": fmt_date(date) }),
                actor,
            ),
        )?;
        tx.commit()?;

        self.get(id)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    /// Remove an entry with its line items and allocations. Auto-posted
    /// entries leave a sync tombstone so the source cannot re-post them.
    pub fn delete(&self, id: &str, actor: &str) -> LedgerResult<Outcome<DeletedEntry>> {
        let entry = self.get(id)?;
        let now = Utc::now();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM line_items WHERE ledger_entry_id = ?1", [id])?;
        tx.execute("DELETE FROM allocations WHERE ledger_entry_id = ?1", [id])?;
        tx.execute("DELETE FROM ledger_entries WHERE id = ?1", [id])?;

        let tombstone = match (&entry.source_module, &entry.source_id, entry.auto_posted) {
            (Some(module), Some(source_id), true) if is_row_id(source_id) => Some(SourceSync::new(&tx).suppress(
                module,
                source_id,
                entry.sync_version.unwrap_or(INITIAL_SYNC_VERSION),
                now,
            )?),
            _ => None,
        };

        insert_event(
            &tx,
            &Event::new(
                "entry_deleted",
                "ledger_entry",
                id,
                serde_json::json!({ "entry": entry, "tombstone": tombstone }),
                actor,
            ),
        )?;
        tx.commit()?;

        info!(entry_id = id, suppressed = tombstone.is_some(), "ledger entry deleted");

        let warnings = self.reconcile_affected(&[&entry]);
        Ok(Outcome::with_warnings(DeletedEntry { entry, tombstone }, warnings))
    }

    // ========================================================================
    // LINE ITEMS
    // ========================================================================

    pub fn add_line_items(&self, entry_id: &str, items: Vec<NewLineItem>) -> LedgerResult<Vec<LineItem>> {
        self.get(entry_id)?;

        for item in &items {
            if item.item_name.trim().is_empty() {
                return Err(LedgerError::validation("line item name is required"));
            }
            if item.quantity <= 0 {
                return Err(LedgerError::validation("line item quantity must be positive"));
            }
            if item.unit_price < 0 {
                return Err(LedgerError::validation("line item price cannot be negative"));
            }
            if item.quantity.checked_mul(item.unit_price).is_none() {
                return Err(LedgerError::validation(format!("line item '{}' total overflows", item.item_name)));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let line = LineItem {
                id: uuid::Uuid::new_v4().to_string(),
                ledger_entry_id: entry_id.to_string(),
                item_name: item.item_name.trim().to_string(),
                quantity: item.quantity,
                unit: item.unit,
                unit_price: item.unit_price,
            };
            tx.execute(
                "INSERT INTO line_items (id, ledger_entry_id, item_name, quantity, unit, unit_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![line.id, line.ledger_entry_id, line.item_name, line.quantity, line.unit, line.unit_price],
            )?;
            created.push(line);
        }
        tx.commit()?;

        Ok(created)
    }

    pub fn line_items(&self, entry_id: &str) -> LedgerResult<Vec<LineItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ledger_entry_id, item_name, quantity, unit, unit_price
             FROM line_items WHERE ledger_entry_id = ?1 ORDER BY rowid",
        )?;
        let items = stmt
            .query_map([entry_id], |row| {
                Ok(LineItem {
                    id: row.get(0)?,
                    ledger_entry_id: row.get(1)?,
                    item_name: row.get(2)?,
                    quantity: row.get(3)?,
                    unit: row.get(4)?,
                    unit_price: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    // ========================================================================
    // AUDIT & MONITORING
    // ========================================================================

    pub fn events_for(&self, entity_id: &str) -> LedgerResult<Vec<Event>> {
        db::get_events_for_entity(self.conn, entity_id)
    }

    pub fn potential_duplicates(&self) -> LedgerResult<Vec<DuplicateGroup>> {
        find_duplicate_groups(self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AccountType, NewAccount};
    use chrono::Duration;

    fn create_test_ledger() -> Ledger {
        Ledger::open_in_memory(LedgerConfig::default()).unwrap()
    }

    fn create_test_account(ledger: &Ledger, code: &str) -> String {
        ledger
            .accounts()
            .create(NewAccount::new("Kas", code, AccountType::Cash, 0), "admin")
            .unwrap()
            .value
            .id
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    #[test]
    fn test_manual_insert_defaults() {
        let ledger = create_test_ledger();
        let account = create_test_account(&ledger, "KAS");

        let outcome = ledger
            .store()
            .insert(NewEntry::new(Direction::Expense, "Listrik", 150_000, day(3)).account(&account).reference("Invoice 44"))
            .unwrap();

        let entry = outcome.value;
        assert!(outcome.warning.is_none());
        assert!(!entry.auto_posted);
        assert_eq!(entry.status, EntryStatus::Posted);
        assert_eq!(entry.source_module, None);
        assert_eq!(entry.reference.as_deref(), Some("Invoice 44"));
        assert_eq!(ledger.accounts().get(&account).unwrap().current_balance, -150_000);
    }

    #[test]
    fn test_validation_errors() {
        let ledger = create_test_ledger();
        let store = ledger.store();

        assert!(matches!(
            store.insert(NewEntry::new(Direction::Income, "SPP", 0, day(1))),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            store.insert(NewEntry::new(Direction::Income, "  ", 10, day(1))),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            store.insert(NewEntry::new(Direction::Income, "SPP", 10, day(1)).account("ghost")),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_auto_post_forces_posted_status() {
        let ledger = create_test_ledger();
        let entry = ledger
            .store()
            .insert(
                NewEntry::new(Direction::Income, "Penjualan", 75_000, day(2))
                    .reference("inventory_sale:3f2b8c4e-6a1d-4e7f-9b2a-0c5d8e1f2a3b")
                    .status(EntryStatus::Draft),
            )
            .unwrap()
            .value;

        assert!(entry.auto_posted);
        assert_eq!(entry.status, EntryStatus::Posted);
        assert_eq!(entry.source_module, Some(SourceModule::InventorySale));
        assert_eq!(entry.sync_version, Some(1));
        assert_eq!(entry.created_by.as_deref(), Some(SYSTEM_ACTOR));
    }

    #[test]
    fn test_typed_source_link() {
        let ledger = create_test_ledger();
        let entry = ledger
            .store()
            .insert(
                NewEntry::new(Direction::Income, "Donasi", 10_000, day(2))
                    .source(SourceModule::Donasi, SourceKey::Row("d-77".to_string())),
            )
            .unwrap()
            .value;

        assert_eq!(entry.reference.as_deref(), Some("donasi:d-77"));
        assert_eq!(entry.source_id.as_deref(), Some("d-77"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let new = NewEntry::new(Direction::Income, "Donasi", 500_000, day(5)).reference("donation:abc-123");

        store.insert(new.clone()).unwrap();
        let err = store.insert(new).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry { .. }));
        assert_eq!(store.list(&EntryQuery::posted()).unwrap().len(), 1);
    }

    #[test]
    fn test_period_postings_are_not_guarded() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let new = NewEntry::new(Direction::Income, "SPP", 1_000_000, day(30)).reference("pembayaran_santri:2025-04");

        store.insert(new.clone()).unwrap();
        store.insert(new).unwrap();
        assert_eq!(store.list(&EntryQuery::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_reference_window_fallback() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let start = Utc::now();

        // a legacy row carries the reference but no normalized source link
        let legacy = store
            .insert_at(NewEntry::new(Direction::Income, "Donasi", 5_000, day(1)).reference("Donasi legacy"), start)
            .unwrap()
            .value;
        ledger
            .connection()
            .execute(
                "UPDATE ledger_entries SET reference = 'donasi:leg-1' WHERE id = ?1",
                [&legacy.id],
            )
            .unwrap();

        let candidate = NewEntry::new(Direction::Income, "Donasi", 5_000, day(1)).reference("donasi:leg-1");
        assert!(matches!(
            store.insert_at(candidate.clone(), start + Duration::seconds(120)),
            Err(LedgerError::DuplicateEntry { .. })
        ));
        assert!(store.insert_at(candidate, start + Duration::seconds(600)).is_ok());
    }

    #[test]
    fn test_list_filters_and_order() {
        let ledger = create_test_ledger();
        let account = create_test_account(&ledger, "KAS");
        let store = ledger.store();

        store.insert(NewEntry::new(Direction::Income, "SPP", 100, day(1)).account(&account)).unwrap();
        store.insert(NewEntry::new(Direction::Expense, "Listrik", 40, day(9)).account(&account)).unwrap();
        store.insert(NewEntry::new(Direction::Income, "SPP", 300, day(20))).unwrap();
        store.insert(NewEntry::new(Direction::Income, "Tabungan Santri", 999, day(10)).account(&account)).unwrap();

        let all = store.list(&EntryQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].date, day(20));

        let ranged = store
            .list(&EntryQuery {
                account_id: Some(account.clone()),
                from: Some(day(1)),
                to: Some(day(9)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let spp = store
            .list(&EntryQuery {
                category: Some("SPP".to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spp.len(), 1);
        assert_eq!(spp[0].amount, 300);
    }

    #[test]
    fn test_update_moves_balance_between_accounts() {
        let ledger = create_test_ledger();
        let a = create_test_account(&ledger, "A");
        let b = create_test_account(&ledger, "B");
        let store = ledger.store();

        let entry = store.insert(NewEntry::new(Direction::Income, "SPP", 1_000, day(1)).account(&a)).unwrap().value;

        let outcome = store
            .update(
                &entry.id,
                EntryUpdate {
                    account_id: Some(Some(b.clone())),
                    amount: Some(1_500),
                    ..Default::default()
                },
                "bendahara",
            )
            .unwrap();

        assert!(outcome.warning.is_none());
        assert_eq!(ledger.accounts().get(&a).unwrap().current_balance, 0);
        assert_eq!(ledger.accounts().get(&b).unwrap().current_balance, 1_500);
        assert_eq!(store.events_for(&entry.id).unwrap().len(), 2);
    }

    #[test]
    fn test_auto_posted_entries_are_immutable() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let entry = store
            .insert(NewEntry::new(Direction::Income, "Donasi", 10, day(1)).reference("donation:x-1"))
            .unwrap()
            .value;

        let result = store.update(
            &entry.id,
            EntryUpdate {
                amount: Some(20),
                ..Default::default()
            },
            "bendahara",
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));

        let synced = store.sync_date(&entry.id, day(15), "system").unwrap();
        assert_eq!(synced.date, day(15));
        assert_eq!(synced.amount, 10);
    }

    #[test]
    fn test_delete_auto_posted_leaves_tombstone() {
        let ledger = create_test_ledger();
        let account = create_test_account(&ledger, "KAS");
        let store = ledger.store();
        let new = NewEntry::new(Direction::Income, "Donasi", 500_000, day(5))
            .account(&account)
            .reference("donation:abc-123");

        let entry = store.insert(new.clone()).unwrap().value;
        let deleted = store.delete(&entry.id, "bendahara").unwrap().value;

        assert_eq!(deleted.tombstone.map(|t| t.suppressed_version), Some(1));
        assert_eq!(ledger.accounts().get(&account).unwrap().current_balance, 0);

        // the donation's sync job tries to recreate it
        assert!(matches!(store.insert(new.clone()), Err(LedgerError::SyncSuppressed { .. })));

        // after the donation changes, a new version may post again
        store.insert(new.sync_version(2)).unwrap();
    }

    #[test]
    fn test_deleting_a_period_posting_keeps_the_period_open() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let new = NewEntry::new(Direction::Income, "SPP", 1_000_000, day(30)).reference("pembayaran_santri:2025-04");

        let first = store.insert(new.clone()).unwrap().value;
        store.insert(new.clone()).unwrap();

        let deleted = store.delete(&first.id, "bendahara").unwrap().value;
        assert!(deleted.tombstone.is_none());

        store.insert(new).unwrap();
        assert_eq!(store.list(&EntryQuery::default()).unwrap().len(), 2);
        assert!(ledger.sync().state(&SourceModule::PembayaranSantri, "2025-04").unwrap().is_none());
    }

    #[test]
    fn test_reconcile_failure_keeps_the_entry() {
        let ledger = create_test_ledger();
        let account = create_test_account(&ledger, "KAS");
        ledger
            .connection()
            .execute_batch(
                "CREATE TRIGGER lock_balances BEFORE UPDATE ON cash_accounts
                 BEGIN SELECT RAISE(ABORT, 'locked'); END;",
            )
            .unwrap();

        let outcome = ledger
            .store()
            .insert(NewEntry::new(Direction::Income, "SPP", 250_000, day(4)).account(&account))
            .unwrap();

        let warning = outcome.warning.expect("reconcile failure is reported");
        assert_eq!(warning.account_id, account);
        assert_eq!(ledger.store().get(&outcome.value.id).unwrap().amount, 250_000);
        assert_eq!(ledger.accounts().get(&account).unwrap().current_balance, 0);
    }

    #[test]
    fn test_clearing_account_owner_reconciles() {
        let ledger = create_test_ledger();
        let mut savings = NewAccount::new("Tabungan", "TAB", AccountType::Savings, 0);
        savings.managed_by = Some("tabungan".to_string());
        let account = ledger.accounts().create(savings, "admin").unwrap().value.id;

        ledger
            .store()
            .insert(NewEntry::new(Direction::Income, "SPP", 5_000, day(6)).account(&account))
            .unwrap();
        assert_eq!(ledger.accounts().get(&account).unwrap().current_balance, 0);

        let outcome = ledger
            .accounts()
            .update(
                &account,
                crate::entities::AccountUpdate {
                    managed_by: Some(None),
                    ..Default::default()
                },
                "admin",
            )
            .unwrap();

        assert!(outcome.warning.is_none());
        assert_eq!(outcome.value.current_balance, 5_000);
        assert!(ledger.accounts().audit(&account).unwrap().is_balanced());
    }

    #[test]
    fn test_line_items() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        let entry = store
            .insert(NewEntry::new(Direction::Income, "Penjualan", 30_000, day(3)).reference("inventory_sale:tx-9"))
            .unwrap()
            .value;

        let items = store
            .add_line_items(
                &entry.id,
                vec![
                    NewLineItem { item_name: "Buku".into(), quantity: 2, unit: Some("pcs".into()), unit_price: 10_000 },
                    NewLineItem { item_name: "Pena".into(), quantity: 5, unit: None, unit_price: 2_000 },
                ],
            )
            .unwrap();
        assert_eq!(items.iter().map(LineItem::total).sum::<i64>(), 30_000);
        assert_eq!(store.line_items(&entry.id).unwrap().len(), 2);

        let bad = store.add_line_items(
            &entry.id,
            vec![NewLineItem { item_name: "X".into(), quantity: 0, unit: None, unit_price: 1 }],
        );
        assert!(matches!(bad, Err(LedgerError::Validation(_))));

        let overflowing = store.add_line_items(
            &entry.id,
            vec![NewLineItem { item_name: "Y".into(), quantity: i64::MAX, unit: None, unit_price: 2 }],
        );
        assert!(matches!(overflowing, Err(LedgerError::Validation(_))));
        assert_eq!(store.line_items(&entry.id).unwrap().len(), 2);
    }

    #[test]
    fn test_potential_duplicates_empty_when_guarded() {
        let ledger = create_test_ledger();
        let store = ledger.store();
        store
            .insert(NewEntry::new(Direction::Income, "Donasi", 1, day(1)).reference("donation:one"))
            .unwrap();
        assert!(store.potential_duplicates().unwrap().is_empty());
    }
}
