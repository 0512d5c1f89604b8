use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::fs::File;
use std::io;

use ledger_sync::telemetry::init_tracing;
use ledger_sync::{export_entries, import_entries, EntryQuery, Ledger, LedgerConfig, Trend};

const CLI_ACTOR: &str = "cli";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = LedgerConfig::load()?;
    init_tracing(&config.log_filter);

    let ledger = Ledger::open(config.clone())
        .with_context(|| format!("Failed to open ledger at {:?}", config.database_path))?;

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let path = match args.get(2) {
                Some(path) => path,
                None => bail!("usage: ledger-sync import <file.csv>"),
            };
            run_import(&ledger, path)
        }
        Some("export") => run_export(&ledger, args.get(2).map(String::as_str)),
        Some("refresh") => run_refresh(&ledger),
        Some("stats") => run_stats(&ledger, args.get(2).map(String::as_str)),
        Some("charts") => run_charts(&ledger, args.get(2).map(String::as_str)),
        Some("accounts") | None => run_accounts(&ledger),
        Some(other) => {
            eprintln!("❌ Unknown command: {}", other);
            eprintln!("   Commands: accounts | import <csv> | export [csv] | refresh | stats [code] | charts [code]");
            std::process::exit(1);
        }
    }
}

/// Resolve an optional account code to its id
fn account_id_for(ledger: &Ledger, code: Option<&str>) -> Result<Option<String>> {
    match code {
        Some(code) => {
            let account = ledger
                .accounts()
                .find_by_code(code)?
                .with_context(|| format!("Unknown account code '{}'", code))?;
            Ok(Some(account.id))
        }
        None => Ok(None),
    }
}

fn run_accounts(ledger: &Ledger) -> Result<()> {
    println!("🏦 Cash Accounts");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let accounts = ledger.accounts();
    for account in accounts.list_active()? {
        let marker = if account.is_default { "⭐" } else { "  " };
        println!(
            "{} {:<12} {:<28} {:>8} {:>16}",
            marker,
            account.code,
            account.name,
            account.account_type.as_str(),
            account.current_balance
        );
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total: {}", accounts.total_balance()?);
    Ok(())
}

fn run_import(ledger: &Ledger, path: &str) -> Result<()> {
    println!("📂 Importing {}...", path);

    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {}", path))?;
    let summary = import_entries(ledger, file, CLI_ACTOR)?;

    println!("✓ Imported: {}", summary.imported);
    println!("✓ Skipped duplicates: {}", summary.skipped_duplicates);
    println!("✓ Skipped (deleted at source): {}", summary.skipped_suppressed);
    for warning in &summary.warnings {
        println!("⚠️  {}", warning);
    }
    Ok(())
}

fn run_export(ledger: &Ledger, path: Option<&str>) -> Result<()> {
    let query = EntryQuery::posted();
    match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
            let written = export_entries(ledger, &query, file)?;
            println!("✓ Exported {} entries to {}", written, path);
        }
        None => {
            export_entries(ledger, &query, io::stdout().lock())?;
        }
    }
    Ok(())
}

fn run_refresh(ledger: &Ledger) -> Result<()> {
    println!("🔄 Refreshing balances...");
    let summary = ledger.accounts().reconcile_all()?;

    println!("✓ Reconciled: {}", summary.reconciled);
    println!("✓ Skipped (owned elsewhere): {}", summary.skipped);
    for warning in &summary.warnings {
        println!("⚠️  {}", warning);
    }

    let duplicates = ledger.store().potential_duplicates()?;
    if !duplicates.is_empty() {
        println!("\n🔍 Potential duplicates:");
        for group in duplicates {
            println!(
                "   {}:{} x{} (total {})",
                group.source_module, group.source_id, group.entry_count, group.total_amount
            );
        }
    }
    Ok(())
}

fn format_trend(trend: Trend) -> String {
    match trend {
        Trend::NoBaseline => "n/a".to_string(),
        Trend::Change(pct) => format!("{:+.1}%", pct),
    }
}

fn run_stats(ledger: &Ledger, code: Option<&str>) -> Result<()> {
    let account_id = account_id_for(ledger, code)?;
    let today = Utc::now().date_naive();
    let stats = ledger.stats().account_stats(account_id.as_deref(), today)?;

    println!("📊 Stats for {}", today.format("%Y-%m"));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Balance:       {}", stats.total_balance);
    println!("Income:        {} ({})", stats.income_this_month, format_trend(stats.income_trend));
    println!("Expense:       {} ({})", stats.expense_this_month, format_trend(stats.expense_trend));
    println!("Transactions:  {}", stats.transaction_count);
    Ok(())
}

fn run_charts(ledger: &Ledger, code: Option<&str>) -> Result<()> {
    let account_id = account_id_for(ledger, code)?;
    let chart = ledger
        .stats()
        .chart_data(account_id.as_deref(), Utc::now().date_naive())?;

    println!("📈 Monthly");
    for point in &chart.monthly {
        println!("   {}  +{:<14} -{}", point.month, point.income, point.expense);
    }

    println!("\n🥧 Expense categories");
    for share in &chart.categories {
        println!("   {:<24} {:>14} {:>3}%", share.category, share.amount, share.percentage);
    }
    Ok(())
}
