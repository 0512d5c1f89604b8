// 🔗 Source modules & reference tags
//
// The typed (SourceModule, SourceKey) pair is the primary link between a
// ledger entry and the external event that produced it. The `module:id`
// string is kept only for display and for rows written before the typed link.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SOURCE MODULE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SourceModule {
    /// Inventory point-of-sale transactions
    InventorySale,

    /// Donation records (English tag)
    Donation,

    /// Donation records (legacy Indonesian tag)
    Donasi,

    /// Student tuition payments
    PembayaranSantri,

    /// Transfers from the foundation
    TransferYayasan,

    /// Inventory postings other than sales
    Inventaris,

    /// Any prefix outside the auto-posting set (never auto-posted)
    Other(String),
}

impl SourceModule {
    pub const KNOWN: [SourceModule; 6] = [
        SourceModule::InventorySale,
        SourceModule::Donation,
        SourceModule::Donasi,
        SourceModule::PembayaranSantri,
        SourceModule::TransferYayasan,
        SourceModule::Inventaris,
    ];

    pub fn parse(tag: &str) -> SourceModule {
        match tag.trim() {
            "inventory_sale" => SourceModule::InventorySale,
            "donation" => SourceModule::Donation,
            "donasi" => SourceModule::Donasi,
            "pembayaran_santri" => SourceModule::PembayaranSantri,
            "transfer_yayasan" => SourceModule::TransferYayasan,
            "inventaris" => SourceModule::Inventaris,
            other => SourceModule::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceModule::InventorySale => "inventory_sale",
            SourceModule::Donation => "donation",
            SourceModule::Donasi => "donasi",
            SourceModule::PembayaranSantri => "pembayaran_santri",
            SourceModule::TransferYayasan => "transfer_yayasan",
            SourceModule::Inventaris => "inventaris",
            SourceModule::Other(tag) => tag,
        }
    }

    /// Entries from known modules are auto-posted; `Other` stays manual
    pub fn is_auto_posting(&self) -> bool {
        !matches!(self, SourceModule::Other(_))
    }
}

impl fmt::Display for SourceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SourceModule {
    fn from(value: String) -> Self {
        SourceModule::parse(&value)
    }
}

impl From<SourceModule> for String {
    fn from(value: SourceModule) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// SOURCE KEY
// ============================================================================

/// Right-hand side of a reference tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKey {
    /// Identifier of a single source row - subject to the Dedup Guard
    Row(String),

    /// Aggregate/periodic posting with no single source row - bypasses the guard
    Period(String),
}

impl SourceKey {
    pub fn classify(raw: &str) -> SourceKey {
        let raw = raw.trim();
        if is_row_id(raw) {
            SourceKey::Row(raw.to_string())
        } else {
            SourceKey::Period(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceKey::Row(id) | SourceKey::Period(id) => id,
        }
    }

    pub fn is_row(&self) -> bool {
        matches!(self, SourceKey::Row(_))
    }
}

const MAX_LEGACY_ID_LEN: usize = 64;

/// A UUID, or a legacy token (`[A-Za-z0-9_-]+`, at most 64 chars) that is not
/// itself a period label.
pub fn is_row_id(raw: &str) -> bool {
    if uuid::Uuid::parse_str(raw).is_ok() {
        return true;
    }

    if raw.is_empty() || raw.len() > MAX_LEGACY_ID_LEN {
        return false;
    }

    let token_shaped = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    token_shaped && !is_period_label(raw)
}

/// `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, or anything with whitespace or `/`
pub fn is_period_label(raw: &str) -> bool {
    if raw.chars().any(|c| c.is_whitespace() || c == '/') {
        return true;
    }

    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").is_ok() && raw.len() == 7 {
        return true;
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

// ============================================================================
// REFERENCE TAG
// ============================================================================

/// Parsed `<module>:<id-or-period>` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTag {
    pub module: SourceModule,
    pub key: SourceKey,
}

impl ReferenceTag {
    /// Parse a reference tag. Returns None for free text without a `module:` prefix.
    pub fn parse(reference: &str) -> Option<ReferenceTag> {
        let (module, rest) = reference.trim().split_once(':')?;
        let module = module.trim();
        let rest = rest.trim();

        if module.is_empty() || rest.is_empty() {
            return None;
        }

        Some(ReferenceTag {
            module: SourceModule::parse(module),
            key: SourceKey::classify(rest),
        })
    }

    pub fn new(module: SourceModule, key: SourceKey) -> Self {
        ReferenceTag { module, key }
    }

    /// Auto-posted entries come from a known module
    pub fn is_auto_posted(&self) -> bool {
        self.module.is_auto_posting()
    }

    /// The Dedup Guard runs for auto-posted rows with a row-shaped id
    pub fn is_guarded(&self) -> bool {
        self.is_auto_posted() && self.key.is_row()
    }
}

impl fmt::Display for ReferenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.key.as_str())
    }
}
