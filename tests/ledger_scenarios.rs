// End-to-end scenarios over an in-memory ledger

use chrono::NaiveDate;
use ledger_sync::{
    AccountType, Direction, EntryQuery, EntryStatus, EntryUpdate, Ledger, LedgerConfig,
    LedgerError, NewAccount, NewEntry, ReconciliationResult, SourceKey, SourceModule, Trend,
};

fn create_test_ledger() -> Ledger {
    Ledger::open_in_memory(LedgerConfig::default()).unwrap()
}

fn create_account(ledger: &Ledger, code: &str, opening: i64) -> String {
    ledger
        .accounts()
        .create(NewAccount::new(&format!("Akun {}", code), code, AccountType::Cash, opening), "admin")
        .unwrap()
        .value
        .id
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn donation_posts_once_and_moves_balance_by_its_amount() {
    let ledger = create_test_ledger();
    let kas = create_account(&ledger, "KAS", 1_000_000);
    let before = ledger.accounts().get(&kas).unwrap().current_balance;

    let donation = || {
        NewEntry::new(Direction::Income, "Donasi", 500_000, date(2025, 5, 1))
            .account(&kas)
            .reference("donation:abc-123")
    };

    let first = ledger.store().insert(donation()).unwrap();
    assert!(first.warning.is_none());
    assert_eq!(first.value.status, EntryStatus::Posted);
    assert!(first.value.auto_posted);

    let err = ledger.store().insert(donation()).unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateEntry { .. }));

    ledger.accounts().reconcile(&kas).unwrap();
    let after = ledger.accounts().get(&kas).unwrap().current_balance;
    assert_eq!(after - before, 500_000);

    let posted = ledger.store().list(&EntryQuery::posted()).unwrap();
    assert_eq!(posted.len(), 1);
}

#[test]
fn typed_source_and_string_reference_share_one_guard() {
    let ledger = create_test_ledger();

    ledger
        .store()
        .insert(
            NewEntry::new(Direction::Income, "Penjualan", 75_000, date(2025, 5, 2))
                .source(SourceModule::InventorySale, SourceKey::classify("sale-77")),
        )
        .unwrap();

    let err = ledger
        .store()
        .insert(
            NewEntry::new(Direction::Income, "Penjualan", 75_000, date(2025, 5, 2))
                .reference("inventory_sale:sale-77"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateEntry { .. }));
}

#[test]
fn balance_matches_recompute_after_mixed_mutations() {
    let ledger = create_test_ledger();
    let kas = create_account(&ledger, "KAS", 1_000);
    let bank = create_account(&ledger, "BANK", 0);
    let store = ledger.store();

    let income = store
        .insert(NewEntry::new(Direction::Income, "SPP", 500, date(2025, 5, 1)).account(&kas))
        .unwrap()
        .value;
    let expense = store
        .insert(NewEntry::new(Direction::Expense, "Listrik", 200, date(2025, 5, 2)).account(&kas))
        .unwrap()
        .value;
    store
        .insert(NewEntry::new(Direction::Income, "Donasi", 50, date(2025, 5, 3)).account(&kas).status(EntryStatus::Draft))
        .unwrap();

    store
        .update(&expense.id, EntryUpdate { amount: Some(300), ..Default::default() }, "admin")
        .unwrap();
    store
        .update(
            &income.id,
            EntryUpdate { account_id: Some(Some(bank.clone())), ..Default::default() },
            "admin",
        )
        .unwrap();

    // kas: 1000 - 300 (draft ignored), bank: 0 + 500
    assert_eq!(ledger.accounts().get(&kas).unwrap().current_balance, 700);
    assert_eq!(ledger.accounts().get(&bank).unwrap().current_balance, 500);

    store.delete(&income.id, "admin").unwrap();
    assert_eq!(ledger.accounts().get(&bank).unwrap().current_balance, 0);

    for id in [&kas, &bank] {
        let report = ledger.accounts().audit(id).unwrap();
        assert_eq!(report.result, ReconciliationResult::Balanced);
        assert_eq!(
            report.computed_balance,
            report.opening_balance + report.total_income - report.total_expense
        );
    }
}

#[test]
fn excluded_rows_are_absent_from_listing_and_totals_alike() {
    let ledger = create_test_ledger();
    let kas = create_account(&ledger, "KAS", 0);
    let savings = ledger
        .accounts()
        .create(
            NewAccount {
                managed_by: Some("Tabungan".to_string()),
                ..NewAccount::new("Tabungan Santri", "TAB", AccountType::Savings, 0)
            },
            "admin",
        )
        .unwrap()
        .value
        .id;
    let store = ledger.store();
    let today = date(2025, 5, 20);

    store.insert(NewEntry::new(Direction::Income, "SPP", 1_000, date(2025, 5, 1)).account(&kas)).unwrap();
    store.insert(NewEntry::new(Direction::Expense, "Listrik", 400, date(2025, 5, 2)).account(&kas)).unwrap();
    // hidden three ways: owner tag, reserved category, excluded module prefix
    store.insert(NewEntry::new(Direction::Income, "Setoran", 9_000, date(2025, 5, 3)).account(&savings)).unwrap();
    store.insert(NewEntry::new(Direction::Income, "Tabungan Santri", 7_000, date(2025, 5, 4)).account(&kas)).unwrap();
    store
        .insert(NewEntry::new(Direction::Expense, "Penarikan", 3_000, date(2025, 5, 5)).reference("tabungan:wd-1"))
        .unwrap();

    let visible = store
        .list(&EntryQuery {
            from: Some(date(2025, 5, 1)),
            to: Some(date(2025, 5, 31)),
            ..EntryQuery::posted()
        })
        .unwrap();
    assert_eq!(visible.len(), 2);

    let listed_income: i64 = visible.iter().filter(|e| e.direction == Direction::Income).map(|e| e.amount).sum();
    let listed_expense: i64 = visible.iter().filter(|e| e.direction == Direction::Expense).map(|e| e.amount).sum();

    let stats = ledger.stats().account_stats(None, today).unwrap();
    assert_eq!(stats.income_this_month, listed_income);
    assert_eq!(stats.expense_this_month, listed_expense);
    assert_eq!(stats.transaction_count, visible.len());

    let chart = ledger.stats().chart_data(None, today).unwrap();
    let may = chart.monthly.last().unwrap();
    assert_eq!(may.month, "2025-05");
    assert_eq!((may.income, may.expense), (listed_income, listed_expense));
    assert_eq!(chart.categories.len(), 1);
    assert_eq!(chart.categories[0].category, "Listrik");

    // the savings account never shows up in account aggregates
    let accounts = ledger.accounts().list_active().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(ledger.accounts().total_balance().unwrap(), stats.total_balance);
}

#[test]
fn trend_formula() {
    assert_eq!(Trend::between(100, 0), Trend::NoBaseline);
    assert_eq!(Trend::between(100, 0).percent(), 0.0);
    assert_eq!(Trend::between(100, 200), Trend::Change(-50.0));

    let ledger = create_test_ledger();
    let store = ledger.store();
    store.insert(NewEntry::new(Direction::Expense, "Listrik", 200, date(2025, 4, 10))).unwrap();
    store.insert(NewEntry::new(Direction::Expense, "Listrik", 100, date(2025, 5, 10))).unwrap();
    store.insert(NewEntry::new(Direction::Income, "SPP", 100, date(2025, 5, 10))).unwrap();

    let stats = ledger.stats().account_stats(None, date(2025, 5, 20)).unwrap();
    assert_eq!(stats.expense_trend, Trend::Change(-50.0));
    assert_eq!(stats.income_trend, Trend::NoBaseline);
}

#[test]
fn auto_split_divides_evenly() {
    let ledger = create_test_ledger();
    let entry = ledger
        .store()
        .insert(NewEntry::new(Direction::Expense, "Konsumsi", 900_000, date(2025, 5, 1)))
        .unwrap()
        .value;

    let beneficiaries: Vec<String> = ["s-1", "s-2", "s-3"].iter().map(|s| s.to_string()).collect();
    let records = ledger
        .allocations()
        .auto_split(&entry.id, 900_000, &beneficiaries, "Makan", "2025-05", None, "admin")
        .unwrap();

    assert_eq!(records.len(), 3);
    for record in &records {
        assert_eq!(record.allocated_amount, 300_000);
        assert!((record.percentage - 33.33).abs() < 0.01);
    }
    assert_eq!(records.iter().map(|r| r.allocated_amount).sum::<i64>(), 900_000);

    // uneven totals still sum exactly
    let uneven = ledger
        .store()
        .insert(NewEntry::new(Direction::Expense, "Konsumsi", 1_000, date(2025, 5, 2)))
        .unwrap()
        .value;
    let records = ledger
        .allocations()
        .auto_split(&uneven.id, 1_000, &beneficiaries, "Makan", "2025-05", None, "admin")
        .unwrap();
    assert_eq!(records.iter().map(|r| r.allocated_amount).sum::<i64>(), 1_000);
}

#[test]
fn only_one_default_account() {
    let ledger = create_test_ledger();
    let x = create_account(&ledger, "X", 0);
    let y = create_account(&ledger, "Y", 0);

    ledger.accounts().set_default(&x, "admin").unwrap();
    ledger.accounts().set_default(&y, "admin").unwrap();

    let defaults: Vec<_> = ledger
        .accounts()
        .list_active()
        .unwrap()
        .into_iter()
        .filter(|a| a.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, y);
}

#[test]
fn closing_an_account_in_use_is_refused() {
    let ledger = create_test_ledger();
    let kas = create_account(&ledger, "KAS", 0);
    ledger
        .store()
        .insert(NewEntry::new(Direction::Income, "SPP", 100, date(2025, 5, 1)).account(&kas))
        .unwrap();

    let err = ledger.accounts().close(&kas, "admin").unwrap_err();
    assert!(matches!(err, LedgerError::AccountInUse { entry_count: 1, .. }));
    assert!(ledger.accounts().get(&kas).unwrap().is_active());
}

#[test]
fn deleted_source_row_stays_deleted_until_version_bump() {
    let ledger = create_test_ledger();
    let payment = |version: i64| {
        NewEntry::new(Direction::Income, "SPP", 250_000, date(2025, 5, 1))
            .reference("pembayaran_santri:pay-9")
            .sync_version(version)
    };

    let entry = ledger.store().insert(payment(1)).unwrap().value;
    let deleted = ledger.store().delete(&entry.id, "admin").unwrap().value;
    assert!(deleted.tombstone.is_some());

    let err = ledger.store().insert(payment(1)).unwrap_err();
    assert!(matches!(err, LedgerError::SyncSuppressed { .. }));
    assert!(!ledger
        .sync()
        .should_post(&SourceModule::PembayaranSantri, "pay-9", 1)
        .unwrap());

    assert!(ledger.store().insert(payment(2)).is_ok());
}
