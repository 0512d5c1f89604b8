// ⚙️ Ledger configuration - rules as data
// Exclusion tags, dedup window and chart window are loaded from JSON so the
// ledger can be pointed at another institution's module layout without code changes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "LEDGER_CONFIG";

/// Environment variable overriding `database_path`
pub const DB_PATH_ENV: &str = "LEDGER_DB_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// source_module tags owned by another subsystem (case-insensitive substring match)
    pub excluded_modules: Vec<String>,

    /// Categories reserved by another subsystem (exact match)
    pub reserved_categories: Vec<String>,

    /// managed_by owners whose accounts are hidden from this ledger
    pub excluded_owners: Vec<String>,

    /// Fallback window of the Dedup Guard, in seconds
    pub dedup_window_secs: i64,

    /// Rolling window (months, current month included) for charts
    pub chart_months: u32,

    /// Default tracing directive when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("ledger.db"),
            excluded_modules: vec!["tabungan".to_string()],
            reserved_categories: vec!["Tabungan Santri".to_string()],
            excluded_owners: vec!["tabungan".to_string()],
            dedup_window_secs: 300,
            chart_months: 7,
            log_filter: "ledger_sync=info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load config from a JSON file. Missing keys fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: LedgerConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve config from the environment: `LEDGER_CONFIG` file (if set),
    /// then the `LEDGER_DB_PATH` override.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.database_path = PathBuf::from(db_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dedup_window_secs <= 0 {
            bail!("dedup_window_secs must be positive, got {}", self.dedup_window_secs);
        }
        if self.chart_months == 0 {
            bail!("chart_months must be at least 1");
        }
        Ok(())
    }
}
