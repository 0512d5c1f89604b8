// ⚖️ Reconciliation Function - the only writer of current_balance
//
//   current_balance = opening_balance + Σ posted income − Σ posted expense
//
// over entries attributed to the account and visible through the exclusion
// filter. Deterministic for a fixed entry set, so it is safe to re-run.

use crate::db::{fmt_ts, LedgerEntry};
use crate::error::{LedgerError, LedgerResult, ReconciliationWarning};
use crate::filters::ExclusionFilter;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// OUTCOME
// ============================================================================

/// A committed mutation plus the reconcile warning it may have produced.
/// The mutation stands either way.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warning: Option<ReconciliationWarning>,
}

impl<T> Outcome<T> {
    pub fn with_warnings(value: T, warnings: Vec<ReconciliationWarning>) -> Self {
        Outcome {
            value,
            warning: warnings.into_iter().next(),
        }
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Cached balance matches the recomputed one
    Balanced,

    /// Cached balance is stale by `difference` (cached - computed)
    Drift { difference: i64 },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced)
    }

    pub fn difference(&self) -> i64 {
        match self {
            ReconciliationResult::Balanced => 0,
            ReconciliationResult::Drift { difference } => *difference,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub account_id: String,
    pub account_name: String,
    pub opening_balance: i64,
    pub total_income: i64,
    pub total_expense: i64,
    pub entry_count: usize,
    pub cached_balance: i64,
    pub computed_balance: i64,
    pub result: ReconciliationResult,
    pub audited_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.result.is_balanced()
    }

    pub fn summary(&self) -> String {
        format!(
            "Account {} ({}): {} entries, computed {}, cached {}, difference {}",
            self.account_name,
            self.account_id,
            self.entry_count,
            self.computed_balance,
            self.cached_balance,
            self.result.difference()
        )
    }
}

/// Result of a full sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub reconciled: usize,
    pub skipped: usize,
    pub warnings: Vec<ReconciliationWarning>,
}

// ============================================================================
// PURE RECOMPUTE
// ============================================================================

/// Opening balance plus the signed sum of posted entries
pub fn compute_balance(opening_balance: i64, entries: &[LedgerEntry]) -> i64 {
    entries
        .iter()
        .filter(|e| e.is_posted())
        .fold(opening_balance, |balance, e| balance + e.signed_amount())
}

// ============================================================================
// RECONCILER
// ============================================================================

struct AccountSnapshot {
    name: String,
    opening_balance: i64,
    current_balance: i64,
    managed_by: Option<String>,
}

pub struct Reconciler<'a> {
    conn: &'a Connection,
    filter: &'a ExclusionFilter,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a Connection, filter: &'a ExclusionFilter) -> Self {
        Reconciler { conn, filter }
    }

    fn snapshot(&self, account_id: &str) -> LedgerResult<AccountSnapshot> {
        self.conn
            .query_row(
                "SELECT name, opening_balance, current_balance, managed_by
                 FROM cash_accounts WHERE id = ?1",
                [account_id],
                |row| {
                    Ok(AccountSnapshot {
                        name: row.get(0)?,
                        opening_balance: row.get(1)?,
                        current_balance: row.get(2)?,
                        managed_by: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("cash account", account_id))
    }

    /// Posted, visible entries attributed to the account
    pub fn attributed_entries(&self, account_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.filter.select_visible(
            self.conn,
            &["e.account_id = ?".to_string(), "e.status = 'posted'".to_string()],
            vec![Value::Text(account_id.to_string())],
        )
    }

    /// Recompute and persist one account's balance.
    /// Returns None when the account is managed by an excluded owner.
    pub fn reconcile(&self, account_id: &str) -> LedgerResult<Option<i64>> {
        let account = self.snapshot(account_id)?;

        if self.filter.is_excluded_owner(account.managed_by.as_deref()) {
            debug!(account_id, "skipping reconcile of externally managed account");
            return Ok(None);
        }

        let entries = self.attributed_entries(account_id)?;
        let balance = compute_balance(account.opening_balance, &entries);

        self.conn.execute(
            "UPDATE cash_accounts SET current_balance = ?1, updated_at = ?2 WHERE id = ?3",
            params![balance, fmt_ts(Utc::now()), account_id],
        )?;

        if balance != account.current_balance {
            info!(
                account_id,
                previous = account.current_balance,
                balance,
                "account balance reconciled"
            );
        }

        Ok(Some(balance))
    }

    /// Reconcile, downgrading any failure to a logged warning
    pub fn reconcile_or_warn(&self, account_id: &str) -> Option<ReconciliationWarning> {
        match self.reconcile(account_id) {
            Ok(_) => None,
            Err(err) => {
                let warning = ReconciliationWarning::new(account_id, &err);
                warn!(account_id, error = %err, "reconciliation failed; balance left stale");
                Some(warning)
            }
        }
    }

    /// Reconcile every active account
    pub fn reconcile_all(&self) -> LedgerResult<SweepSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM cash_accounts WHERE status = 'active' ORDER BY code")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = SweepSummary::default();
        for id in ids {
            match self.reconcile(&id) {
                Ok(Some(_)) => summary.reconciled += 1,
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    warn!(account_id = %id, error = %err, "reconciliation failed during sweep");
                    summary.warnings.push(ReconciliationWarning::new(&id, &err));
                }
            }
        }

        info!(
            reconciled = summary.reconciled,
            skipped = summary.skipped,
            failed = summary.warnings.len(),
            "balance sweep finished"
        );
        Ok(summary)
    }

    /// Compare the cached balance with a fresh recompute without writing
    pub fn audit(&self, account_id: &str) -> LedgerResult<ReconciliationReport> {
        let account = self.snapshot(account_id)?;
        let entries = if self.filter.is_excluded_owner(account.managed_by.as_deref()) {
            Vec::new()
        } else {
            self.attributed_entries(account_id)?
        };

        let (total_income, total_expense) = entries.iter().fold((0i64, 0i64), |(inc, exp), e| {
            if e.signed_amount() > 0 {
                (inc + e.amount, exp)
            } else {
                (inc, exp + e.amount)
            }
        });

        let computed_balance = compute_balance(account.opening_balance, &entries);
        let difference = account.current_balance - computed_balance;
        let result = if difference == 0 {
            ReconciliationResult::Balanced
        } else {
            ReconciliationResult::Drift { difference }
        };

        Ok(ReconciliationReport {
            account_id: account_id.to_string(),
            account_name: account.name,
            opening_balance: account.opening_balance,
            total_income,
            total_expense,
            entry_count: entries.len(),
            cached_balance: account.current_balance,
            computed_balance,
            result,
            audited_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_entry_row, setup_database, Direction, EntryStatus};
    use chrono::NaiveDate;

    fn create_test_entry(account: &str, direction: Direction, amount: i64, status: EntryStatus) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            category: "Operasional".to_string(),
            subcategory: None,
            amount,
            date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            description: None,
            counterparty: None,
            account_id: Some(account.to_string()),
            status,
            auto_posted: false,
            source_module: None,
            source_id: None,
            reference: None,
            sync_version: None,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }

    fn create_test_account(conn: &Connection, id: &str, opening: i64, managed_by: Option<&str>) {
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO cash_accounts (id, name, code, account_type, opening_balance, current_balance,
                                        managed_by, created_at, updated_at)
             VALUES (?1, ?1, ?1, 'cash', ?2, ?2, ?3, ?4, ?4)",
            params![id, opening, managed_by, now],
        )
        .unwrap();
    }

    fn cached_balance(conn: &Connection, id: &str) -> i64 {
        conn.query_row("SELECT current_balance FROM cash_accounts WHERE id = ?1", [id], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_compute_balance_ignores_unposted() {
        let entries = vec![
            create_test_entry("kas", Direction::Income, 1_000, EntryStatus::Posted),
            create_test_entry("kas", Direction::Expense, 300, EntryStatus::Posted),
            create_test_entry("kas", Direction::Income, 9_999, EntryStatus::Draft),
            create_test_entry("kas", Direction::Expense, 9_999, EntryStatus::Cancelled),
        ];
        assert_eq!(compute_balance(500, &entries), 1_200);
    }

    #[test]
    fn test_reconcile_persists_balance() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        create_test_account(&conn, "kas", 100_000, None);

        insert_entry_row(&conn, &create_test_entry("kas", Direction::Income, 50_000, EntryStatus::Posted), None).unwrap();
        insert_entry_row(&conn, &create_test_entry("kas", Direction::Expense, 20_000, EntryStatus::Posted), None).unwrap();

        let filter = ExclusionFilter::default();
        let reconciler = Reconciler::new(&conn, &filter);

        let before = reconciler.audit("kas").unwrap();
        assert_eq!(before.result, ReconciliationResult::Drift { difference: -30_000 });

        assert_eq!(reconciler.reconcile("kas").unwrap(), Some(130_000));
        assert_eq!(cached_balance(&conn, "kas"), 130_000);

        // idempotent
        assert_eq!(reconciler.reconcile("kas").unwrap(), Some(130_000));
        assert!(reconciler.audit("kas").unwrap().is_balanced());
    }

    #[test]
    fn test_excluded_owner_is_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        create_test_account(&conn, "tab", 7, Some("tabungan"));

        let filter = ExclusionFilter::default();
        let reconciler = Reconciler::new(&conn, &filter);
        assert_eq!(reconciler.reconcile("tab").unwrap(), None);

        let summary = reconciler.reconcile_all().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.reconciled, 0);
    }

    #[test]
    fn test_reconcile_or_warn_missing_account() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let filter = ExclusionFilter::default();
        let warning = Reconciler::new(&conn, &filter).reconcile_or_warn("ghost").unwrap();
        assert_eq!(warning.account_id, "ghost");
        assert!(warning.cause.contains("not found"));
    }
}
