// Ledger Sync - Web Server
// REST API with Axum + periodic balance sweep

use anyhow::{Context, Result};
use ledger_sync::api::{router, AppState};
use ledger_sync::telemetry::init_tracing;
use ledger_sync::{Ledger, LedgerConfig};
use std::time::Duration;
use tracing::{info, warn};

const BIND_ENV: &str = "LEDGER_BIND";
const DEFAULT_BIND: &str = "0.0.0.0:3000";
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Re-run `reconcile_all` on a fixed interval so stale cached balances heal
/// even when nobody presses "refresh".
fn spawn_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let ledger = match state.ledger.lock() {
                Ok(ledger) => ledger,
                Err(_) => {
                    warn!("ledger lock poisoned, stopping sweep");
                    return;
                }
            };

            match ledger.accounts().reconcile_all() {
                Ok(summary) => info!(
                    reconciled = summary.reconciled,
                    skipped = summary.skipped,
                    warnings = summary.warnings.len(),
                    "periodic balance sweep"
                ),
                Err(err) => warn!(error = %err, "periodic balance sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("🌐 Ledger Sync - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = LedgerConfig::load()?;
    init_tracing(&config.log_filter);

    let ledger = Ledger::open(config.clone())
        .with_context(|| format!("Failed to open database at {:?}", config.database_path))?;
    println!("✓ Database opened: {:?}", config.database_path);

    let summary = ledger.accounts().reconcile_all()?;
    println!("✓ Balances reconciled: {} accounts", summary.reconciled);

    let state = AppState::new(ledger);
    spawn_sweep(state.clone());

    let app = router(state);

    let bind = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    println!("✓ Server running on http://{}", bind);
    println!("\n📡 API Endpoints:");
    println!("   GET    /api/health");
    println!("   GET    /api/accounts");
    println!("   POST   /api/accounts/refresh");
    println!("   GET    /api/entries");
    println!("   POST   /api/entries");
    println!("   GET    /api/stats");
    println!("   GET    /api/charts");
    println!("\nPress Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
