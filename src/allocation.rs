// 🧮 Allocation Sub-ledger - apportion an expense across beneficiaries
//
// Three modes per expense entry: none, automatic overhead split, direct
// allocation. Batches are all-or-nothing.

use crate::db::{fmt_ts, get_entry, insert_event, parse_ts, Direction, Event};
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub const TOP_BENEFICIARIES: usize = 10;

// ============================================================================
// ALLOCATION MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// No allocation rows for the entry
    None,

    /// Evenly split overhead
    AutoSplit,

    /// Amounts chosen per beneficiary
    Direct,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::None => "none",
            AllocationMode::AutoSplit => "auto_split",
            AllocationMode::Direct => "direct",
        }
    }
}

impl FromStr for AllocationMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AllocationMode::None),
            "auto_split" => Ok(AllocationMode::AutoSplit),
            "direct" => Ok(AllocationMode::Direct),
            other => Err(LedgerError::validation(format!("unknown allocation mode '{}'", other))),
        }
    }
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: String,
    pub ledger_entry_id: String,
    pub beneficiary_id: String,
    pub allocated_amount: i64,
    pub percentage: f64,
    pub assistance_type: String,
    /// Period label, usually `YYYY-MM`
    pub period: String,
    pub note: Option<String>,
    pub mode: AllocationMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAllocation {
    pub beneficiary_id: String,
    pub allocated_amount: i64,
    #[serde(default)]
    pub percentage: Option<f64>,
    pub assistance_type: String,
    pub period: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAllocationSummary {
    pub ledger_entry_id: String,
    pub entry_amount: i64,
    pub allocated_total: i64,
    pub unallocated: i64,
    pub beneficiary_count: usize,
    pub mode: AllocationMode,
}

/// Accumulated assistance for one beneficiary in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryPeriodSummary {
    pub beneficiary_id: String,
    pub period: String,
    pub total: i64,
    pub allocation_count: usize,
    pub assistance_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryTotal {
    pub beneficiary_id: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStatistics {
    pub total_allocations: usize,
    pub total_amount: i64,
    pub unique_beneficiaries: usize,
    pub periods: Vec<String>,
    pub top_beneficiaries: Vec<BeneficiaryTotal>,
}

const ALLOCATION_COLUMNS: &str = "id, ledger_entry_id, beneficiary_id, allocated_amount, percentage,
    assistance_type, period, note, allocation_mode, created_at";

fn allocation_from_row(row: &Row<'_>) -> rusqlite::Result<AllocationRecord> {
    let mode: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(AllocationRecord {
        id: row.get(0)?,
        ledger_entry_id: row.get(1)?,
        beneficiary_id: row.get(2)?,
        allocated_amount: row.get(3)?,
        percentage: row.get(4)?,
        assistance_type: row.get(5)?,
        period: row.get(6)?,
        note: row.get(7)?,
        mode: mode.parse().map_err(|e: LedgerError| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_ts(&created_at)?,
    })
}

fn validate_allocation(new: &NewAllocation) -> LedgerResult<()> {
    if new.beneficiary_id.trim().is_empty() {
        return Err(LedgerError::validation("beneficiary is required"));
    }
    if new.assistance_type.trim().is_empty() {
        return Err(LedgerError::validation("assistance type is required"));
    }
    if new.period.trim().is_empty() {
        return Err(LedgerError::validation("period is required"));
    }
    if new.allocated_amount <= 0 {
        return Err(LedgerError::validation("allocated amount must be positive"));
    }
    if let Some(pct) = new.percentage {
        if !(0.0..=100.0).contains(&pct) {
            return Err(LedgerError::validation(format!(
                "allocation percentage must be between 0 and 100, got {}",
                pct
            )));
        }
    }
    Ok(())
}

/// Integer split: each gets total / count, the last absorbs the remainder
pub fn split_evenly(total: i64, count: usize) -> Vec<i64> {
    if count == 0 {
        return Vec::new();
    }
    let share = total / count as i64;
    let remainder = total - share * count as i64;

    let mut shares = vec![share; count];
    if let Some(last) = shares.last_mut() {
        *last += remainder;
    }
    shares
}

// ============================================================================
// ALLOCATION LEDGER
// ============================================================================

pub struct AllocationLedger<'a> {
    conn: &'a Connection,
}

impl<'a> AllocationLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        AllocationLedger { conn }
    }

    /// Allocations may only hang off expense entries
    fn expense_amount(&self, entry_id: &str) -> LedgerResult<i64> {
        let entry = get_entry(self.conn, entry_id)?;
        if entry.direction != Direction::Expense {
            return Err(LedgerError::validation("allocations require an expense entry"));
        }
        Ok(entry.amount)
    }

    fn insert_batch(
        &self,
        entry_id: &str,
        batch: Vec<NewAllocation>,
        mode: AllocationMode,
        actor: &str,
    ) -> LedgerResult<Vec<AllocationRecord>> {
        let entry_amount = self.expense_amount(entry_id)?;
        if batch.is_empty() {
            return Err(LedgerError::validation("allocation batch is empty"));
        }
        for new in &batch {
            validate_allocation(new)?;
        }

        let now = Utc::now();
        let tx = self.conn.unchecked_transaction()?;
        let mut created = Vec::with_capacity(batch.len());

        for new in batch {
            let percentage = new
                .percentage
                .unwrap_or(new.allocated_amount as f64 / entry_amount as f64 * 100.0)
                .min(100.0);

            let record = AllocationRecord {
                id: uuid::Uuid::new_v4().to_string(),
                ledger_entry_id: entry_id.to_string(),
                beneficiary_id: new.beneficiary_id.trim().to_string(),
                allocated_amount: new.allocated_amount,
                percentage,
                assistance_type: new.assistance_type.trim().to_string(),
                period: new.period.trim().to_string(),
                note: new.note,
                mode,
                created_at: now,
            };

            tx.execute(
                "INSERT INTO allocations (id, ledger_entry_id, beneficiary_id, allocated_amount, percentage,
                    assistance_type, period, note, allocation_mode, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.ledger_entry_id,
                    record.beneficiary_id,
                    record.allocated_amount,
                    record.percentage,
                    record.assistance_type,
                    record.period,
                    record.note,
                    record.mode.as_str(),
                    fmt_ts(record.created_at),
                ],
            )?;
            created.push(record);
        }

        insert_event(
            &tx,
            &Event::new(
                "allocations_created",
                "ledger_entry",
                entry_id,
                serde_json::json!({ "mode": mode.as_str(), "count": created.len() }),
                actor,
            ),
        )?;
        tx.commit()?;

        info!(entry_id, count = created.len(), mode = mode.as_str(), "allocations recorded");
        Ok(created)
    }

    /// Direct allocation; every row is validated before anything is written
    pub fn create_batch(&self, entry_id: &str, batch: Vec<NewAllocation>, actor: &str) -> LedgerResult<Vec<AllocationRecord>> {
        self.insert_batch(entry_id, batch, AllocationMode::Direct, actor)
    }

    /// Even overhead split across `beneficiaries`
    pub fn auto_split(
        &self,
        entry_id: &str,
        total: i64,
        beneficiaries: &[String],
        assistance_type: &str,
        period: &str,
        note: Option<&str>,
        actor: &str,
    ) -> LedgerResult<Vec<AllocationRecord>> {
        if beneficiaries.is_empty() {
            return Err(LedgerError::validation("auto-split needs at least one beneficiary"));
        }
        if total <= 0 {
            return Err(LedgerError::validation("auto-split total must be positive"));
        }
        let mut seen = HashSet::new();
        if !beneficiaries.iter().all(|b| seen.insert(b.trim())) {
            return Err(LedgerError::validation("auto-split beneficiaries must be distinct"));
        }
        if total < beneficiaries.len() as i64 {
            return Err(LedgerError::validation("auto-split total is smaller than the beneficiary count"));
        }

        let percentage = 100.0 / beneficiaries.len() as f64;
        let batch = beneficiaries
            .iter()
            .zip(split_evenly(total, beneficiaries.len()))
            .map(|(beneficiary_id, amount)| NewAllocation {
                beneficiary_id: beneficiary_id.clone(),
                allocated_amount: amount,
                percentage: Some(percentage),
                assistance_type: assistance_type.to_string(),
                period: period.to_string(),
                note: note.map(str::to_string),
            })
            .collect();

        self.insert_batch(entry_id, batch, AllocationMode::AutoSplit, actor)
    }

    // ========================================================================
    // READS
    // ========================================================================

    fn query(&self, where_clause: &str, params: &[&dyn rusqlite::ToSql]) -> LedgerResult<Vec<AllocationRecord>> {
        let sql = format!(
            "SELECT {} FROM allocations WHERE {} ORDER BY period DESC, created_at ASC, rowid ASC",
            ALLOCATION_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, allocation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn for_entry(&self, entry_id: &str) -> LedgerResult<Vec<AllocationRecord>> {
        self.query("ledger_entry_id = ?1", &[&entry_id])
    }

    pub fn for_beneficiary(&self, beneficiary_id: &str, period: Option<&str>) -> LedgerResult<Vec<AllocationRecord>> {
        match period {
            Some(period) => self.query("beneficiary_id = ?1 AND period = ?2", &[&beneficiary_id, &period]),
            None => self.query("beneficiary_id = ?1", &[&beneficiary_id]),
        }
    }

    fn all(&self) -> LedgerResult<Vec<AllocationRecord>> {
        self.query("1 = 1", &[])
    }

    // ========================================================================
    // DELETES
    // ========================================================================

    pub fn delete(&self, id: &str) -> LedgerResult<()> {
        let removed = self.conn.execute("DELETE FROM allocations WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(LedgerError::not_found("allocation", id));
        }
        Ok(())
    }

    pub fn delete_for_entry(&self, entry_id: &str) -> LedgerResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM allocations WHERE ledger_entry_id = ?1", [entry_id])?)
    }

    // ========================================================================
    // SUMMARIES
    // ========================================================================

    pub fn summary_for_entry(&self, entry_id: &str) -> LedgerResult<EntryAllocationSummary> {
        let entry = get_entry(self.conn, entry_id)?;
        let records = self.for_entry(entry_id)?;

        let allocated_total: i64 = records.iter().map(|r| r.allocated_amount).sum();
        let beneficiaries: HashSet<&str> = records.iter().map(|r| r.beneficiary_id.as_str()).collect();
        let mode = records.first().map(|r| r.mode).unwrap_or(AllocationMode::None);

        Ok(EntryAllocationSummary {
            ledger_entry_id: entry.id,
            entry_amount: entry.amount,
            allocated_total,
            unallocated: entry.amount - allocated_total,
            beneficiary_count: beneficiaries.len(),
            mode,
        })
    }

    /// Per-period accumulation for one beneficiary, newest period first
    pub fn summary_for_beneficiary(&self, beneficiary_id: &str) -> LedgerResult<Vec<BeneficiaryPeriodSummary>> {
        let records = self.for_beneficiary(beneficiary_id, None)?;

        let mut order: Vec<BeneficiaryPeriodSummary> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let i = *index.entry(record.period.clone()).or_insert_with(|| {
                order.push(BeneficiaryPeriodSummary {
                    beneficiary_id: record.beneficiary_id.clone(),
                    period: record.period.clone(),
                    total: 0,
                    allocation_count: 0,
                    assistance_types: Vec::new(),
                });
                order.len() - 1
            });

            let summary = &mut order[i];
            summary.total += record.allocated_amount;
            summary.allocation_count += 1;
            if !summary.assistance_types.contains(&record.assistance_type) {
                summary.assistance_types.push(record.assistance_type);
            }
        }

        order.sort_by(|a, b| b.period.cmp(&a.period));
        Ok(order)
    }

    pub fn statistics(&self) -> LedgerResult<AllocationStatistics> {
        let records = self.all()?;

        let total_amount = records.iter().map(|r| r.allocated_amount).sum();
        let periods: BTreeSet<String> = records.iter().map(|r| r.period.clone()).collect();

        let mut totals: Vec<BeneficiaryTotal> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            match index.get(record.beneficiary_id.as_str()) {
                Some(&i) => totals[i].total += record.allocated_amount,
                None => {
                    index.insert(record.beneficiary_id.as_str(), totals.len());
                    totals.push(BeneficiaryTotal {
                        beneficiary_id: record.beneficiary_id.clone(),
                        total: record.allocated_amount,
                    });
                }
            }
        }
        let unique_beneficiaries = totals.len();

        totals.sort_by(|a, b| b.total.cmp(&a.total));
        totals.truncate(TOP_BENEFICIARIES);

        Ok(AllocationStatistics {
            total_allocations: records.len(),
            total_amount,
            unique_beneficiaries,
            periods: periods.into_iter().rev().collect(),
            top_beneficiaries: totals,
        })
    }
}
