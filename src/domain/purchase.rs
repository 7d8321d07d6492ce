use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::transaction::{Metal, TransactionKind, TransactionRecord};

/// Status vocabulary shared by purchases and gift transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 4] = [
        TransferStatus::Pending,
        TransferStatus::Processing,
        TransferStatus::Completed,
        TransferStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transfer status '{}'", s))
    }
}

/// A token purchase, written by the payment and blockchain-listener paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub metal: Metal,
    pub token_amount: BigDecimal,
    pub usd_amount: BigDecimal,
    pub fee_amount: BigDecimal,
    pub price_per_gram: BigDecimal,
    pub payment_method: String,
    pub status: TransferStatus,
    pub wallet_address: String,
    pub transaction_hash: Option<String>,
    pub network: String,
    pub created_at: DateTime<Utc>,
}

impl From<PurchaseRecord> for TransactionRecord {
    fn from(purchase: PurchaseRecord) -> Self {
        let details = json!({
            "userId": purchase.user_id,
            "pricePerGram": purchase.price_per_gram.to_string(),
        });

        TransactionRecord {
            id: purchase.id,
            kind: TransactionKind::Purchase,
            subtype: purchase.payment_method,
            metal: purchase.metal,
            token_amount: purchase.token_amount,
            usd_value: purchase.usd_amount,
            fee_amount: purchase.fee_amount,
            status: purchase.status.as_str().to_string(),
            occurred_at: purchase.created_at,
            wallet_address: purchase.wallet_address,
            transaction_hash: purchase.transaction_hash,
            network: purchase.network,
            details: details.as_object().cloned().unwrap_or_default(),
        }
    }
}
