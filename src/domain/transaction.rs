//! Merged ledger view.
//! A `TransactionRecord` is derived at read time from a purchase, redemption or gift
//! and is never persisted.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Redemption,
    Gift,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Redemption => "redemption",
            TransactionKind::Gift => "gift",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "purchase" => Ok(TransactionKind::Purchase),
            "redemption" => Ok(TransactionKind::Redemption),
            "gift" => Ok(TransactionKind::Gift),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    Gold,
    Silver,
}

impl Metal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Silver => "silver",
        }
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(Metal::Gold),
            "silver" => Ok(Metal::Silver),
            other => Err(format!("unknown metal '{}'", other)),
        }
    }
}

/// One row of the unified transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub subtype: String,
    pub metal: Metal,
    pub token_amount: BigDecimal,
    pub usd_value: BigDecimal,
    pub fee_amount: BigDecimal,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    pub wallet_address: String,
    pub transaction_hash: Option<String>,
    pub network: String,
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Ledger order: newest first, then id ascending, then kind.
///
/// Ids are only unique per kind, so the kind is the final tie-break that keeps the
/// order total across sources.
pub fn ledger_order(a: &TransactionRecord, b: &TransactionRecord) -> Ordering {
    b.occurred_at
        .cmp(&a.occurred_at)
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.kind.cmp(&b.kind))
}
