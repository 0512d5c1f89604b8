// 📊 Stats Aggregator - period sums, trends, category distribution
//
// Reads through the shared exclusion filter (same path as the entry listing)
// and only aggregates posted entries.

use crate::db::{Direction, EntryStatus, LedgerEntry};
use crate::deduplication::dedupe_for_stats;
use crate::entities::AccountRegistry;
use crate::error::LedgerResult;
use crate::filters::ExclusionFilter;
use crate::ledger::EntryQuery;
use chrono::{Datelike, Months, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// TREND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum Trend {
    /// Previous period was zero: no signal, reported as 0%
    NoBaseline,

    /// ((current - previous) / previous) * 100
    Change(f64),
}

impl Trend {
    pub fn between(current: i64, previous: i64) -> Trend {
        if previous == 0 {
            Trend::NoBaseline
        } else {
            Trend::Change((current - previous) as f64 / previous as f64 * 100.0)
        }
    }

    pub fn percent(&self) -> f64 {
        match self {
            Trend::NoBaseline => 0.0,
            Trend::Change(pct) => *pct,
        }
    }
}

// ============================================================================
// OUTPUT SHAPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub total_balance: i64,
    pub income_this_month: i64,
    pub expense_this_month: i64,

    /// Posted entries dated in the current month
    pub transaction_count: usize,
    pub income_trend: Trend,
    pub expense_trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPoint {
    /// `YYYY-MM`
    pub month: String,
    pub income: i64,
    pub expense: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub amount: i64,
    /// Rounded whole percent of the window's expense total
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub monthly: Vec<MonthlyPoint>,
    pub categories: Vec<CategoryShare>,
}

// ============================================================================
// PERIOD HELPERS
// ============================================================================

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn month_end(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start)
}

fn months_back(date: NaiveDate, months: u32) -> NaiveDate {
    month_start(date)
        .checked_sub_months(Months::new(months))
        .unwrap_or_else(|| month_start(date))
}

fn sum_direction(entries: &[LedgerEntry], direction: Direction) -> i64 {
    entries
        .iter()
        .filter(|e| e.direction == direction)
        .map(|e| e.amount)
        .sum()
}

/// Shares sorted by amount descending; ties keep first-seen order
pub fn distribution<'e, I>(pairs: I) -> Vec<CategoryShare>
where
    I: IntoIterator<Item = (&'e str, i64)>,
{
    let mut order: Vec<(String, i64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (label, amount) in pairs {
        match index.get(label) {
            Some(&i) => order[i].1 += amount,
            None => {
                index.insert(label.to_string(), order.len());
                order.push((label.to_string(), amount));
            }
        }
    }

    let grand_total: i64 = order.iter().map(|(_, amount)| amount).sum();

    let mut shares: Vec<CategoryShare> = order
        .into_iter()
        .map(|(category, amount)| CategoryShare {
            percentage: if grand_total > 0 {
                (amount as f64 / grand_total as f64 * 100.0).round() as i64
            } else {
                0
            },
            category,
            amount,
        })
        .collect();

    shares.sort_by(|a, b| b.amount.cmp(&a.amount));
    shares
}

// ============================================================================
// STATS AGGREGATOR
// ============================================================================

pub struct StatsAggregator<'a> {
    conn: &'a Connection,
    filter: &'a ExclusionFilter,
    chart_months: u32,
}

impl<'a> StatsAggregator<'a> {
    pub fn new(conn: &'a Connection, filter: &'a ExclusionFilter, chart_months: u32) -> Self {
        StatsAggregator {
            conn,
            filter,
            chart_months: chart_months.max(1),
        }
    }

    /// Visible posted entries in [from, to], with the composite-key backstop applied
    pub fn posted_entries(
        &self,
        account_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let query = EntryQuery {
            account_id: account_id.map(str::to_string),
            from: Some(from),
            to: Some(to),
            status: Some(EntryStatus::Posted),
            ..Default::default()
        };

        let (conditions, values) = query.conditions();
        let entries = self.filter.select_visible(self.conn, &conditions, values)?;
        Ok(dedupe_for_stats(entries))
    }

    fn balance(&self, account_id: Option<&str>) -> LedgerResult<i64> {
        let registry = AccountRegistry::new(self.conn, self.filter);
        match account_id {
            Some(id) => {
                let account = registry.get(id)?;
                if self.filter.is_excluded_owner(account.managed_by.as_deref()) {
                    Ok(0)
                } else {
                    Ok(account.current_balance)
                }
            }
            None => registry.total_balance(),
        }
    }

    pub fn account_stats(&self, account_id: Option<&str>, today: NaiveDate) -> LedgerResult<AccountStats> {
        let this_start = month_start(today);
        let prev_start = months_back(today, 1);

        let current = self.posted_entries(account_id, this_start, month_end(today))?;
        let previous = self.posted_entries(account_id, prev_start, month_end(prev_start))?;

        let income_this_month = sum_direction(&current, Direction::Income);
        let expense_this_month = sum_direction(&current, Direction::Expense);

        Ok(AccountStats {
            total_balance: self.balance(account_id)?,
            income_this_month,
            expense_this_month,
            transaction_count: current.len(),
            income_trend: Trend::between(income_this_month, sum_direction(&previous, Direction::Income)),
            expense_trend: Trend::between(expense_this_month, sum_direction(&previous, Direction::Expense)),
        })
    }

    /// Rolling window: `chart_months` months ending with today's month
    fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (months_back(today, self.chart_months - 1), month_end(today))
    }

    pub fn chart_data(&self, account_id: Option<&str>, today: NaiveDate) -> LedgerResult<ChartData> {
        let (from, to) = self.window(today);
        let entries = self.posted_entries(account_id, from, to)?;

        let mut monthly: Vec<MonthlyPoint> = (0..self.chart_months)
            .rev()
            .map(|back| MonthlyPoint {
                month: months_back(today, back).format("%Y-%m").to_string(),
                income: 0,
                expense: 0,
            })
            .collect();

        for entry in &entries {
            let key = entry.date.format("%Y-%m").to_string();
            if let Some(point) = monthly.iter_mut().find(|p| p.month == key) {
                match entry.direction {
                    Direction::Income => point.income += entry.amount,
                    Direction::Expense => point.expense += entry.amount,
                }
            }
        }

        let categories = distribution(
            entries
                .iter()
                .filter(|e| e.direction == Direction::Expense)
                .map(|e| (e.category.as_str(), e.amount)),
        );

        Ok(ChartData { monthly, categories })
    }

    /// Expense breakdown by subcategory, optionally within one category
    pub fn subcategory_distribution(
        &self,
        account_id: Option<&str>,
        category: Option<&str>,
        today: NaiveDate,
    ) -> LedgerResult<Vec<CategoryShare>> {
        let (from, to) = self.window(today);
        let entries = self.posted_entries(account_id, from, to)?;

        Ok(distribution(
            entries
                .iter()
                .filter(|e| e.direction == Direction::Expense)
                .filter(|e| category.map_or(true, |c| e.category == c))
                .map(|e| (e.subcategory.as_deref().unwrap_or(e.category.as_str()), e.amount)),
        ))
    }
}
