// 💳 Cash Account Registry - accounts, default selection, soft close
//
// "Account name is a VALUE (can change), account id is IDENTITY (never changes)"
//
// current_balance is a derived cache. Only the Reconciler writes it; every
// registry mutation that can move it ends in a reconcile.

use crate::db::{fmt_ts, insert_event, parse_ts, Event};
use crate::error::{LedgerError, LedgerResult};
use crate::filters::ExclusionFilter;
use crate::reconciliation::{Outcome, ReconciliationReport, Reconciler, SweepSummary};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

// ============================================================================
// ACCOUNT TYPE & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Petty cash / cash box
    Cash,

    /// Bank current account
    Bank,

    /// Savings account
    Savings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Cash => "cash",
            AccountType::Bank => "bank",
            AccountType::Savings => "savings",
        }
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" | "kas" => Ok(AccountType::Cash),
            "bank" => Ok(AccountType::Bank),
            "savings" | "tabungan" => Ok(AccountType::Savings),
            other => Err(LedgerError::validation(format!("unknown account type '{}'", other))),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Closed,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Closed => "closed",
            AccountStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "aktif" => Ok(AccountStatus::Active),
            "closed" | "ditutup" => Ok(AccountStatus::Closed),
            "suspended" => Ok(AccountStatus::Suspended),
            other => Err(LedgerError::validation(format!("unknown account status '{}'", other))),
        }
    }
}

// ============================================================================
// CASH ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashAccount {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    pub name: String,

    /// Unique short code (e.g. "KAS-01")
    pub code: String,

    pub account_type: AccountType,
    pub opening_balance: i64,

    /// Derived cache, written by reconcile only
    pub current_balance: i64,

    pub status: AccountStatus,
    pub is_default: bool,

    /// Tag naming an owning external subsystem, if any
    pub managed_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CashAccount {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, code, account_type, opening_balance, current_balance,
    status, is_default, managed_by, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<CashAccount> {
    let account_type: String = row.get(3)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    let convert = |e: LedgerError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(CashAccount {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        account_type: account_type.parse().map_err(convert)?,
        opening_balance: row.get(4)?,
        current_balance: row.get(5)?,
        status: status.parse().map_err(convert)?,
        is_default: row.get(7)?,
        managed_by: row.get(8)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ============================================================================
// INPUTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub code: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub opening_balance: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub managed_by: Option<String>,
}

impl NewAccount {
    pub fn new(name: &str, code: &str, account_type: AccountType, opening_balance: i64) -> Self {
        NewAccount {
            name: name.to_string(),
            code: code.to_string(),
            account_type,
            opening_balance,
            is_default: false,
            managed_by: None,
        }
    }
}

/// Partial edit; None leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub account_type: Option<AccountType>,
    pub opening_balance: Option<i64>,
    /// Some(None) clears the tag
    pub managed_by: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeBalance {
    pub account_type: AccountType,
    pub account_count: usize,
    pub balance: i64,
}

fn validate_identity(name: &str, code: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("account name is required"));
    }
    if code.trim().is_empty() {
        return Err(LedgerError::validation("account code is required"));
    }
    Ok(())
}

fn validate_opening(opening_balance: i64) -> LedgerResult<()> {
    if opening_balance < 0 {
        return Err(LedgerError::validation("opening balance cannot be negative"));
    }
    Ok(())
}

fn code_conflict(err: rusqlite::Error, code: &str) -> LedgerError {
    if crate::db::is_unique_violation(&err) {
        LedgerError::validation(format!("account code '{}' is already in use", code))
    } else {
        err.into()
    }
}

// ============================================================================
// ACCOUNT REGISTRY
// ============================================================================

pub struct AccountRegistry<'a> {
    conn: &'a Connection,
    filter: &'a ExclusionFilter,
}

impl<'a> AccountRegistry<'a> {
    pub fn new(conn: &'a Connection, filter: &'a ExclusionFilter) -> Self {
        AccountRegistry { conn, filter }
    }

    fn reconciler(&self) -> Reconciler<'a> {
        Reconciler::new(self.conn, self.filter)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get(&self, id: &str) -> LedgerResult<CashAccount> {
        let sql = format!("SELECT {} FROM cash_accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        self.conn
            .query_row(&sql, [id], account_from_row)
            .optional()?
            .ok_or_else(|| LedgerError::not_found("cash account", id))
    }

    pub fn find_by_code(&self, code: &str) -> LedgerResult<Option<CashAccount>> {
        let sql = format!("SELECT {} FROM cash_accounts WHERE code = ?1", ACCOUNT_COLUMNS);
        Ok(self.conn.query_row(&sql, [code.trim()], account_from_row).optional()?)
    }

    /// Active accounts visible to this ledger, ordered by code
    pub fn list_active(&self) -> LedgerResult<Vec<CashAccount>> {
        let sql = format!(
            "SELECT {} FROM cash_accounts WHERE status = 'active' ORDER BY code",
            ACCOUNT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts
            .into_iter()
            .filter(|a| !self.filter.is_excluded_owner(a.managed_by.as_deref()))
            .collect())
    }

    pub fn default_account(&self) -> LedgerResult<Option<CashAccount>> {
        Ok(self.list_active()?.into_iter().find(|a| a.is_default))
    }

    /// Posted entries attributed to the account, regardless of visibility
    pub fn attributed_entry_count(&self, id: &str) -> LedgerResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE account_id = ?1 AND status = 'posted'",
            [id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn total_balance(&self) -> LedgerResult<i64> {
        Ok(self.list_active()?.iter().map(|a| a.current_balance).sum())
    }

    pub fn balance_by_type(&self) -> LedgerResult<Vec<TypeBalance>> {
        let mut grouped: BTreeMap<AccountType, TypeBalance> = BTreeMap::new();

        for account in self.list_active()? {
            let slot = grouped.entry(account.account_type).or_insert(TypeBalance {
                account_type: account.account_type,
                account_count: 0,
                balance: 0,
            });
            slot.account_count += 1;
            slot.balance += account.current_balance;
        }

        Ok(grouped.into_values().collect())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Create an account, or reopen a closed one carrying the same code
    pub fn create(&self, new: NewAccount, actor: &str) -> LedgerResult<Outcome<CashAccount>> {
        validate_identity(&new.name, &new.code)?;
        validate_opening(new.opening_balance)?;

        let code = new.code.trim().to_string();
        let now = fmt_ts(Utc::now());
        let tx = self.conn.unchecked_transaction()?;

        let id = match self.find_by_code(&code)? {
            Some(existing) if existing.status == AccountStatus::Closed => {
                tx.execute(
                    "UPDATE cash_accounts
                     SET name = ?1, account_type = ?2, opening_balance = ?3, status = 'active',
                         managed_by = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        new.name.trim(),
                        new.account_type.as_str(),
                        new.opening_balance,
                        new.managed_by,
                        now,
                        existing.id
                    ],
                )?;
                info!(account_id = %existing.id, code = %code, "closed account reopened");
                existing.id
            }
            Some(_) => {
                return Err(LedgerError::validation(format!(
                    "account code '{}' is already in use",
                    code
                )))
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO cash_accounts (id, name, code, account_type, opening_balance,
                        current_balance, status, is_default, managed_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, 'active', 0, ?6, ?7, ?7)",
                    params![
                        id,
                        new.name.trim(),
                        code,
                        new.account_type.as_str(),
                        new.opening_balance,
                        new.managed_by,
                        now
                    ],
                )
                .map_err(|e| code_conflict(e, &code))?;
                info!(account_id = %id, code = %code, "account created");
                id
            }
        };

        if new.is_default {
            Self::apply_default(&tx, &id, &now)?;
        }

        insert_event(
            &tx,
            &Event::new(
                "account_created",
                "cash_account",
                &id,
                serde_json::json!({ "code": code, "opening_balance": new.opening_balance }),
                actor,
            ),
        )?;
        tx.commit()?;

        let warning = self.reconciler().reconcile_or_warn(&id);
        Ok(Outcome {
            value: self.get(&id)?,
            warning,
        })
    }

    pub fn update(&self, id: &str, update: AccountUpdate, actor: &str) -> LedgerResult<Outcome<CashAccount>> {
        let current = self.get(id)?;

        let name = update.name.unwrap_or(current.name);
        let code = update.code.map(|c| c.trim().to_string()).unwrap_or(current.code);
        let account_type = update.account_type.unwrap_or(current.account_type);
        let opening_balance = update.opening_balance.unwrap_or(current.opening_balance);
        let managed_by = update.managed_by.unwrap_or_else(|| current.managed_by.clone());

        validate_identity(&name, &code)?;
        validate_opening(opening_balance)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE cash_accounts
             SET name = ?1, code = ?2, account_type = ?3, opening_balance = ?4, managed_by = ?5,
                 updated_at = ?6
             WHERE id = ?7",
            params![
                name.trim(),
                code,
                account_type.as_str(),
                opening_balance,
                managed_by,
                fmt_ts(Utc::now()),
                id
            ],
        )
        .map_err(|e| code_conflict(e, &code))?;

        insert_event(
            &tx,
            &Event::new(
                "account_updated",
                "cash_account",
                id,
                serde_json::json!({
                    "code": code,
                    "opening_balance": { "from": current.opening_balance, "to": opening_balance },
                    "managed_by": { "from": current.managed_by, "to": managed_by },
                }),
                actor,
            ),
        )?;
        tx.commit()?;

        // the owner decides whether attributed entries count toward the balance
        let warning = if opening_balance != current.opening_balance || managed_by != current.managed_by {
            self.reconciler().reconcile_or_warn(id)
        } else {
            None
        };

        Ok(Outcome {
            value: self.get(id)?,
            warning,
        })
    }

    fn apply_default(conn: &Connection, id: &str, now: &str) -> LedgerResult<()> {
        conn.execute(
            "UPDATE cash_accounts SET is_default = 0, updated_at = ?1 WHERE is_default = 1 AND id != ?2",
            params![now, id],
        )?;
        conn.execute(
            "UPDATE cash_accounts SET is_default = 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    /// Make `id` the single default account
    pub fn set_default(&self, id: &str, actor: &str) -> LedgerResult<CashAccount> {
        let account = self.get(id)?;
        if account.status == AccountStatus::Closed {
            return Err(LedgerError::validation("a closed account cannot be the default"));
        }

        let tx = self.conn.unchecked_transaction()?;
        Self::apply_default(&tx, id, &fmt_ts(Utc::now()))?;
        insert_event(
            &tx,
            &Event::new("account_default_set", "cash_account", id, serde_json::json!({}), actor),
        )?;
        tx.commit()?;

        info!(account_id = id, "default account changed");
        self.get(id)
    }

    /// Soft delete. Refused while posted entries are attributed to the account.
    pub fn close(&self, id: &str, actor: &str) -> LedgerResult<CashAccount> {
        let account = self.get(id)?;
        if account.status == AccountStatus::Closed {
            return Ok(account);
        }

        let entry_count = self.attributed_entry_count(id)?;
        if entry_count > 0 {
            return Err(LedgerError::AccountInUse {
                account_id: id.to_string(),
                entry_count,
            });
        }

        self.set_status(id, AccountStatus::Closed, actor)
    }

    pub fn suspend(&self, id: &str, actor: &str) -> LedgerResult<CashAccount> {
        let account = self.get(id)?;
        if account.status == AccountStatus::Closed {
            return Err(LedgerError::validation("a closed account cannot be suspended"));
        }
        self.set_status(id, AccountStatus::Suspended, actor)
    }

    pub fn reactivate(&self, id: &str, actor: &str) -> LedgerResult<CashAccount> {
        self.get(id)?;
        self.set_status(id, AccountStatus::Active, actor)
    }

    fn set_status(&self, id: &str, status: AccountStatus, actor: &str) -> LedgerResult<CashAccount> {
        let tx = self.conn.unchecked_transaction()?;

        // a closed account never stays default
        tx.execute(
            "UPDATE cash_accounts
             SET status = ?1,
                 is_default = CASE WHEN ?1 = 'closed' THEN 0 ELSE is_default END,
                 updated_at = ?2
             WHERE id = ?3",
            params![status.as_str(), fmt_ts(Utc::now()), id],
        )?;
        insert_event(
            &tx,
            &Event::new(
                "account_status_changed",
                "cash_account",
                id,
                serde_json::json!({ "status": status.as_str() }),
                actor,
            ),
        )?;
        tx.commit()?;

        info!(account_id = id, status = status.as_str(), "account status changed");
        self.get(id)
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    pub fn reconcile(&self, id: &str) -> LedgerResult<Option<i64>> {
        self.reconciler().reconcile(id)
    }

    pub fn reconcile_all(&self) -> LedgerResult<SweepSummary> {
        self.reconciler().reconcile_all()
    }

    pub fn audit(&self, id: &str) -> LedgerResult<ReconciliationReport> {
        self.reconciler().audit(id)
    }
}
