// 🚧 Module Exclusion Filter - one predicate for every listing and aggregate
//
// An entry belongs to another subsystem when its source_module contains an
// excluded tag, its category is reserved, or its account is managed by an
// excluded owner. The SQL clause and the row predicate below express the same
// rule and are built from the same lists.

use crate::config::LedgerConfig;
use crate::db::{entry_from_row, LedgerEntry, ENTRY_COLUMNS};
use crate::error::LedgerResult;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionFilter {
    excluded_modules: Vec<String>,
    reserved_categories: Vec<String>,
    excluded_owners: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(
        excluded_modules: Vec<String>,
        reserved_categories: Vec<String>,
        excluded_owners: Vec<String>,
    ) -> Self {
        // SQLite lower() only folds ASCII, so the Rust side does the same
        let normalize = |tags: Vec<String>| -> Vec<String> {
            tags.into_iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        };

        ExclusionFilter {
            excluded_modules: normalize(excluded_modules),
            reserved_categories: reserved_categories
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect(),
            excluded_owners: normalize(excluded_owners),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            config.excluded_modules.clone(),
            config.reserved_categories.clone(),
            config.excluded_owners.clone(),
        )
    }

    /// A filter that hides nothing
    pub fn permissive() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    // ========================================================================
    // ROW PREDICATE
    // ========================================================================

    pub fn is_excluded_module(&self, source_module: &str) -> bool {
        let module = source_module.to_ascii_lowercase();
        self.excluded_modules.iter().any(|tag| module.contains(tag.as_str()))
    }

    pub fn is_reserved_category(&self, category: &str) -> bool {
        self.reserved_categories.iter().any(|c| c == category)
    }

    /// True when an account's managed_by tag names an excluded owner
    pub fn is_excluded_owner(&self, managed_by: Option<&str>) -> bool {
        match managed_by {
            Some(owner) => {
                let owner = owner.trim().to_ascii_lowercase();
                self.excluded_owners.iter().any(|o| *o == owner)
            }
            None => false,
        }
    }

    /// `account_managed_by` is the managed_by of the entry's account, if any
    pub fn is_owned_by_other_module(&self, entry: &LedgerEntry, account_managed_by: Option<&str>) -> bool {
        let module_hit = entry
            .source_module
            .as_ref()
            .map(|m| self.is_excluded_module(m.as_str()))
            .unwrap_or(false);

        module_hit || self.is_reserved_category(&entry.category) || self.is_excluded_owner(account_managed_by)
    }

    // ========================================================================
    // SQL CLAUSE
    // ========================================================================

    /// WHERE fragment over `ledger_entries e LEFT JOIN cash_accounts a`.
    /// Bound values are appended to `params` in placeholder order.
    pub fn sql_clause(&self, params: &mut Vec<Value>) -> String {
        let mut parts = Vec::new();

        if !self.excluded_modules.is_empty() {
            let checks: Vec<&str> = self
                .excluded_modules
                .iter()
                .map(|tag| {
                    params.push(Value::Text(tag.clone()));
                    "instr(lower(e.source_module), ?) = 0"
                })
                .collect();
            parts.push(format!("(e.source_module IS NULL OR ({}))", checks.join(" AND ")));
        }

        if !self.reserved_categories.is_empty() {
            let placeholders: Vec<&str> = self
                .reserved_categories
                .iter()
                .map(|category| {
                    params.push(Value::Text(category.clone()));
                    "?"
                })
                .collect();
            parts.push(format!("e.category NOT IN ({})", placeholders.join(", ")));
        }

        if !self.excluded_owners.is_empty() {
            let placeholders: Vec<&str> = self
                .excluded_owners
                .iter()
                .map(|owner| {
                    params.push(Value::Text(owner.clone()));
                    "?"
                })
                .collect();
            parts.push(format!(
                "(a.managed_by IS NULL OR lower(trim(a.managed_by)) NOT IN ({}))",
                placeholders.join(", ")
            ));
        }

        if parts.is_empty() {
            "1 = 1".to_string()
        } else {
            parts.join(" AND ")
        }
    }

    // ========================================================================
    // VISIBLE ENTRY SELECTION
    // ========================================================================

    /// Select entries matching `conditions` that belong to this ledger.
    ///
    /// Every listing and aggregate reads through here, so an entry hidden
    /// from a list never reaches a total. Ordered by date desc, created_at desc.
    pub fn select_visible(
        &self,
        conn: &Connection,
        conditions: &[String],
        mut params: Vec<Value>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let mut clauses: Vec<String> = conditions.to_vec();
        clauses.push(self.sql_clause(&mut params));

        let sql = format!(
            "SELECT {}, a.managed_by
             FROM ledger_entries e
             LEFT JOIN cash_accounts a ON a.id = e.account_id
             WHERE {}
             ORDER BY e.date DESC, e.created_at DESC, e.id ASC",
            ENTRY_COLUMNS,
            clauses.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let managed_by: Option<String> = row.get(19)?;
                Ok((entry_from_row(row)?, managed_by))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|(entry, managed_by)| !self.is_owned_by_other_module(entry, managed_by.as_deref()))
            .map(|(entry, _)| entry)
            .collect())
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}
