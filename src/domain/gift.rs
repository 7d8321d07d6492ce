use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::purchase::TransferStatus;
use super::transaction::{Metal, TransactionKind, TransactionRecord};

/// Peer-to-peer token transfer between platform wallets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRecord {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub metal: Metal,
    pub token_amount: BigDecimal,
    pub usd_value: BigDecimal,
    pub sender_wallet: String,
    pub recipient_wallet: String,
    pub message: Option<String>,
    pub status: TransferStatus,
    pub transaction_hash: Option<String>,
    pub network: String,
    pub created_at: DateTime<Utc>,
}

impl GiftRecord {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.recipient_id == Some(user_id)
    }

    /// Normalizes the gift from `viewer`'s side of the transfer.
    ///
    /// The recipient sees a `received` entry on their own wallet; everyone else,
    /// including platform-wide queries, sees the sender's `sent` entry.
    pub fn normalize_for(self, viewer: Option<Uuid>) -> TransactionRecord {
        let received = viewer.is_some() && viewer == self.recipient_id && viewer != Some(self.sender_id);
        let (subtype, wallet_address, counterparty) = if received {
            ("received", self.recipient_wallet, self.sender_wallet)
        } else {
            ("sent", self.sender_wallet, self.recipient_wallet)
        };

        let mut details = serde_json::Map::new();
        details.insert("senderId".into(), self.sender_id.to_string().into());
        if let Some(recipient) = self.recipient_id {
            details.insert("recipientId".into(), recipient.to_string().into());
        }
        details.insert("counterpartyWallet".into(), counterparty.into());
        if let Some(message) = self.message {
            details.insert("message".into(), message.into());
        }

        TransactionRecord {
            id: self.id,
            kind: TransactionKind::Gift,
            subtype: subtype.to_string(),
            metal: self.metal,
            token_amount: self.token_amount,
            usd_value: self.usd_value,
            fee_amount: BigDecimal::from(0),
            status: self.status.as_str().to_string(),
            occurred_at: self.created_at,
            wallet_address,
            transaction_hash: self.transaction_hash,
            network: self.network,
            details,
        }
    }
}
