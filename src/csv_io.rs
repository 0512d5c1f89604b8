// 📄 CSV import/export for ledger entries
//
// Columns: date,direction,category,amount,account_code,description,reference
// Imported rows go through the normal insert path, so the Dedup Guard and
// sync tombstones apply to them like any other caller.

use crate::db::{fmt_date, Direction, DATE_FORMAT};
use crate::error::{LedgerError, ReconciliationWarning};
use crate::ledger::{EntryQuery, Ledger, NewEntry};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvEntryRow {
    pub date: String,
    pub direction: String,
    pub category: String,
    pub amount: i64,
    pub account_code: Option<String>,
    pub description: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub skipped_suppressed: usize,
    pub warnings: Vec<ReconciliationWarning>,
}

pub fn import_entries<R: Read>(ledger: &Ledger, reader: R, actor: &str) -> Result<ImportSummary> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let store = ledger.store();
    let accounts = ledger.accounts();
    let mut account_ids: HashMap<String, String> = HashMap::new();
    let mut summary = ImportSummary::default();

    for (index, result) in rdr.deserialize::<CsvEntryRow>().enumerate() {
        let line = index + 2; // 1-indexed + header row
        let row = result.with_context(|| format!("Failed to parse CSV line {}", line))?;

        let date = NaiveDate::parse_from_str(&row.date, DATE_FORMAT)
            .with_context(|| format!("Invalid date '{}' on line {}", row.date, line))?;
        let direction: Direction = row
            .direction
            .parse()
            .with_context(|| format!("Invalid direction on line {}", line))?;

        let mut new = NewEntry::new(direction, &row.category, row.amount, date).actor(actor);

        if let Some(code) = row.account_code.as_deref().filter(|c| !c.is_empty()) {
            let account_id = match account_ids.get(code) {
                Some(id) => id.clone(),
                None => {
                    let account = accounts
                        .find_by_code(code)?
                        .ok_or_else(|| anyhow!("Unknown account code '{}' on line {}", code, line))?;
                    account_ids.insert(code.to_string(), account.id.clone());
                    account.id
                }
            };
            new = new.account(&account_id);
        }
        if let Some(description) = row.description.as_deref().filter(|d| !d.is_empty()) {
            new = new.description(description);
        }
        if let Some(reference) = row.reference.as_deref().filter(|r| !r.is_empty()) {
            new = new.reference(reference);
        }

        match store.insert(new) {
            Ok(outcome) => {
                summary.imported += 1;
                summary.warnings.extend(outcome.warning);
            }
            Err(LedgerError::DuplicateEntry { source_module, source_id }) => {
                warn!(line, source_module = %source_module, source_id = %source_id, "duplicate row skipped");
                summary.skipped_duplicates += 1;
            }
            Err(LedgerError::SyncSuppressed { source_module, source_id, .. }) => {
                warn!(line, source_module = %source_module, source_id = %source_id, "deleted source row skipped");
                summary.skipped_suppressed += 1;
            }
            Err(err) => return Err(err).with_context(|| format!("Failed to import CSV line {}", line)),
        }
    }

    info!(
        imported = summary.imported,
        duplicates = summary.skipped_duplicates,
        suppressed = summary.skipped_suppressed,
        "csv import finished"
    );
    Ok(summary)
}

/// Write the filtered listing; returns the number of rows written
pub fn export_entries<W: Write>(ledger: &Ledger, query: &EntryQuery, writer: W) -> Result<usize> {
    let entries = ledger.store().list(query)?;
    let accounts = ledger.accounts();
    let mut codes: HashMap<String, String> = HashMap::new();

    let mut wtr = csv::Writer::from_writer(writer);
    for entry in &entries {
        let account_code = match &entry.account_id {
            Some(id) => {
                if !codes.contains_key(id) {
                    let code = accounts.get(id)?.code;
                    codes.insert(id.clone(), code);
                }
                codes.get(id).cloned()
            }
            None => None,
        };

        wtr.serialize(CsvEntryRow {
            date: fmt_date(entry.date),
            direction: entry.direction.as_str().to_string(),
            category: entry.category.clone(),
            amount: entry.amount,
            account_code,
            description: entry.description.clone(),
            reference: entry.reference.clone(),
        })
        .context("Failed to write CSV row")?;
    }
    wtr.flush().context("Failed to flush CSV output")?;

    Ok(entries.len())
}
