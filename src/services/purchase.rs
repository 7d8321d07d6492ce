//! Write paths for the purchase and gift collections.
//!
//! Both collections are normally filled by the payment and on-chain listener paths; these
//! operations are what those paths call.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{GiftRecord, Metal, PurchaseRecord, TransferStatus};
use crate::error::AppError;
use crate::ports::{GiftRepository, PurchaseRepository};
use crate::services::fees::{calculate_purchase, FeeConfig};
use crate::utils::timeout::bounded;
use crate::validation::{
    sanitize_string, validate_enum, validate_max_len, validate_positive_amount,
    validate_required, validate_transaction_hash, validate_wallet_address, ValidationError,
    ValidationResult, ALLOWED_PAYMENT_METHODS, NETWORK_MAX_LEN,
};

const GIFT_MESSAGE_MAX_LEN: usize = 280;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPurchase {
    pub metal: Metal,
    pub usd_amount: BigDecimal,
    pub price_per_gram: BigDecimal,
    pub payment_method: String,
    pub wallet_address: String,
    pub network: String,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub status: Option<TransferStatus>,
}

impl RecordPurchase {
    fn validate(&self) -> ValidationResult {
        validate_positive_amount("usd_amount", &self.usd_amount)?;
        validate_positive_amount("price_per_gram", &self.price_per_gram)?;
        validate_enum("payment_method", &self.payment_method, ALLOWED_PAYMENT_METHODS)?;
        validate_wallet_address("wallet_address", &self.wallet_address)?;
        validate_required("network", &self.network)?;
        validate_max_len("network", &self.network, NETWORK_MAX_LEN)?;
        if let Some(hash) = &self.transaction_hash {
            validate_transaction_hash(hash)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordGift {
    pub recipient_id: Option<Uuid>,
    pub metal: Metal,
    pub token_amount: BigDecimal,
    pub usd_value: BigDecimal,
    pub sender_wallet: String,
    pub recipient_wallet: String,
    pub message: Option<String>,
    pub network: String,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub status: Option<TransferStatus>,
}

impl RecordGift {
    fn validate(&self, sender_id: Uuid) -> ValidationResult {
        validate_positive_amount("token_amount", &self.token_amount)?;
        validate_positive_amount("usd_value", &self.usd_value)?;
        validate_wallet_address("sender_wallet", &self.sender_wallet)?;
        validate_wallet_address("recipient_wallet", &self.recipient_wallet)?;
        if self.recipient_id == Some(sender_id) {
            return Err(ValidationError::new("recipient_id", "must differ from the sender"));
        }
        validate_required("network", &self.network)?;
        validate_max_len("network", &self.network, NETWORK_MAX_LEN)?;
        if let Some(message) = &self.message {
            validate_max_len("message", message, GIFT_MESSAGE_MAX_LEN)?;
        }
        if let Some(hash) = &self.transaction_hash {
            validate_transaction_hash(hash)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TransferService {
    purchases: Arc<dyn PurchaseRepository>,
    gifts: Arc<dyn GiftRepository>,
    fees: FeeConfig,
    mg_per_token: BigDecimal,
    store_timeout: Duration,
}

impl TransferService {
    pub fn new(
        purchases: Arc<dyn PurchaseRepository>,
        gifts: Arc<dyn GiftRepository>,
        fees: FeeConfig,
        mg_per_token: BigDecimal,
        store_timeout: Duration,
    ) -> Self {
        Self {
            purchases,
            gifts,
            fees,
            mg_per_token,
            store_timeout,
        }
    }

    /// Splits the payment into fee and tokens and records the purchase.
    pub async fn record_purchase(
        &self,
        user_id: Uuid,
        input: RecordPurchase,
    ) -> Result<PurchaseRecord, AppError> {
        input.validate()?;
        let quote = calculate_purchase(
            &input.usd_amount,
            &input.price_per_gram,
            &self.mg_per_token,
            &self.fees,
        )?;

        let record = PurchaseRecord {
            id: Uuid::new_v4(),
            user_id,
            metal: input.metal,
            token_amount: quote.token_amount,
            usd_amount: quote.gross_usd,
            fee_amount: quote.fee_amount_usd,
            price_per_gram: input.price_per_gram,
            payment_method: input.payment_method,
            status: input.status.unwrap_or(TransferStatus::Pending),
            wallet_address: input.wallet_address.trim().to_string(),
            transaction_hash: input.transaction_hash.map(|h| h.trim().to_string()),
            network: input.network.trim().to_string(),
            created_at: Utc::now(),
        };

        let saved = bounded(
            self.store_timeout,
            "insert_purchase",
            self.purchases.insert(&record),
        )
        .await?;
        tracing::info!(
            purchase_id = %saved.id,
            user_id = %user_id,
            token_amount = %saved.token_amount,
            "Purchase recorded"
        );
        Ok(saved)
    }

    pub async fn record_gift(&self, sender_id: Uuid, input: RecordGift) -> Result<GiftRecord, AppError> {
        input.validate(sender_id)?;

        let record = GiftRecord {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id: input.recipient_id,
            metal: input.metal,
            token_amount: input.token_amount,
            usd_value: input.usd_value,
            sender_wallet: input.sender_wallet.trim().to_string(),
            recipient_wallet: input.recipient_wallet.trim().to_string(),
            message: input.message.map(|m| sanitize_string(&m)),
            status: input.status.unwrap_or(TransferStatus::Pending),
            transaction_hash: input.transaction_hash.map(|h| h.trim().to_string()),
            network: input.network.trim().to_string(),
            created_at: Utc::now(),
        };

        let saved = bounded(self.store_timeout, "insert_gift", self.gifts.insert(&record)).await?;
        tracing::info!(gift_id = %saved.id, sender_id = %sender_id, "Gift recorded");
        Ok(saved)
    }
}
