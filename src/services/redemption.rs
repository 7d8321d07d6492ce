//! Redemption lifecycle service.
//!
//! Transitions are linearized per record with an optimistic compare-and-swap on the
//! `version` column; notifications are dispatched only after the transition is committed.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Metal, NotificationEvent, NotificationStatus, RedemptionAction, RedemptionRequest,
    RedemptionStatus,
};
use crate::error::AppError;
use crate::ports::{RedemptionRepository, SourceFilter};
use crate::services::fees::{calculate_redemption_cost, grams_to_tokens, FeeConfig};
use crate::services::ledger::{resolve_pagination, Pagination};
use crate::services::notifications::{DispatchOutcome, NotificationDispatcher};
use crate::utils::timeout::bounded;
use crate::validation::{
    sanitize_string, validate_enum, validate_max_len, validate_non_negative_amount,
    validate_positive_amount, validate_quantity, validate_required, validate_transaction_hash,
    validate_wallet_address, ValidationResult, ALLOWED_DELIVERY_METHODS,
    CANCELLATION_REASON_MAX_LEN, ERROR_MESSAGE_MAX_LEN, NETWORK_MAX_LEN,
};

/// Input for a new redemption request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRedemption {
    pub wallet_address: String,
    pub metal: Metal,
    pub quantity: i32,
    pub grams_amount: BigDecimal,
    pub price_per_gram: BigDecimal,
    #[serde(default)]
    pub delivery_fee: Option<BigDecimal>,
    pub delivery_method: String,
    pub network: String,
    pub transaction_hash: Option<String>,
}

impl SubmitRedemption {
    fn validate(&self) -> ValidationResult {
        validate_wallet_address("wallet_address", &self.wallet_address)?;
        validate_quantity(self.quantity)?;
        validate_positive_amount("grams_amount", &self.grams_amount)?;
        validate_positive_amount("price_per_gram", &self.price_per_gram)?;
        if let Some(fee) = &self.delivery_fee {
            validate_non_negative_amount("delivery_fee", fee)?;
        }
        validate_enum("delivery_method", &self.delivery_method, ALLOWED_DELIVERY_METHODS)?;
        validate_required("network", &self.network)?;
        validate_max_len("network", &self.network, NETWORK_MAX_LEN)?;
        if let Some(hash) = &self.transaction_hash {
            validate_transaction_hash(hash)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionPage {
    pub redemptions: Vec<RedemptionRequest>,
    pub pagination: Pagination,
}

/// Per-event outcome of a redelivery pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeliveryReport {
    pub redemption_id: Uuid,
    pub attempted: Vec<(NotificationEvent, DispatchOutcome)>,
}

#[derive(Debug, Clone)]
pub struct RedemptionSettings {
    pub mg_per_token: BigDecimal,
    pub store_timeout: Duration,
    pub max_retries: u32,
}

impl Default for RedemptionSettings {
    fn default() -> Self {
        Self {
            mg_per_token: BigDecimal::from(1000),
            store_timeout: Duration::from_millis(5000),
            max_retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct RedemptionService {
    repo: Arc<dyn RedemptionRepository>,
    dispatcher: NotificationDispatcher,
    fees: FeeConfig,
    settings: RedemptionSettings,
}

impl RedemptionService {
    pub fn new(
        repo: Arc<dyn RedemptionRepository>,
        dispatcher: NotificationDispatcher,
        fees: FeeConfig,
        settings: RedemptionSettings,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            fees,
            settings,
        }
    }

    async fn load(&self, id: Uuid) -> Result<RedemptionRequest, AppError> {
        bounded(
            self.settings.store_timeout,
            "find_redemption",
            self.repo.find_by_id(id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Redemption {} not found", id)))
    }

    /// Prices and records a new `pending` redemption, then emits the request notification.
    pub async fn submit(
        &self,
        user_id: Uuid,
        input: SubmitRedemption,
    ) -> Result<RedemptionRequest, AppError> {
        input.validate()?;

        let delivery_fee = input.delivery_fee.clone().unwrap_or_else(|| BigDecimal::from(0));
        let cost = calculate_redemption_cost(
            &input.grams_amount,
            &input.price_per_gram,
            &delivery_fee,
            &self.fees,
        )?;
        let token_amount = grams_to_tokens(&input.grams_amount, &self.settings.mg_per_token)?;

        let now = Utc::now();
        let record = RedemptionRequest {
            id: Uuid::new_v4(),
            user_id,
            wallet_address: input.wallet_address.trim().to_string(),
            metal: input.metal,
            quantity: input.quantity,
            grams_amount: input.grams_amount,
            token_amount,
            token_value_usd: cost.token_value_usd,
            platform_fee_usd: cost.platform_fee_usd,
            delivery_fee: cost.delivery_fee,
            total_cost_usd: cost.total_cost_usd,
            delivery_method: input.delivery_method,
            network: input.network.trim().to_string(),
            transaction_hash: input.transaction_hash.map(|h| h.trim().to_string()),
            status: RedemptionStatus::Pending,
            notification_status: NotificationStatus::default(),
            cancellation_reason: None,
            error_message: None,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let mut saved = bounded(
            self.settings.store_timeout,
            "insert_redemption",
            self.repo.insert(&record),
        )
        .await?;

        tracing::info!(
            redemption_id = %saved.id,
            user_id = %user_id,
            metal = %saved.metal,
            total_cost_usd = %saved.total_cost_usd,
            "Redemption submitted"
        );

        let outcome = self
            .dispatcher
            .dispatch(&saved, NotificationEvent::Requested)
            .await;
        saved.notification_status.set(NotificationEvent::Requested, outcome.is_claimed());
        Ok(saved)
    }

    pub async fn get(&self, id: Uuid, requester: Uuid) -> Result<RedemptionRequest, AppError> {
        let redemption = self.load(id).await?;
        if !redemption.is_owned_by(requester) {
            return Err(AppError::Forbidden(format!(
                "Redemption {} does not belong to the requester",
                id
            )));
        }
        Ok(redemption)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<RedemptionPage, AppError> {
        let (page, limit) = resolve_pagination(page, limit)?;
        let filter = SourceFilter {
            user_id: Some(user_id),
            ..Default::default()
        };
        let offset = (page - 1).checked_mul(limit).ok_or_else(|| {
            AppError::InvalidArgument(format!("page {} is out of range", page))
        })?;
        let timeout = self.settings.store_timeout;

        let (redemptions, total) = futures::future::try_join(
            bounded(
                timeout,
                "list_redemptions",
                self.repo.find(&filter, limit, offset),
            ),
            bounded(timeout, "count_redemptions", self.repo.count(&filter)),
        )
        .await?;

        Ok(RedemptionPage {
            redemptions,
            pagination: Pagination::new(page, limit, total),
        })
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        requester: Uuid,
        reason: Option<String>,
    ) -> Result<RedemptionRequest, AppError> {
        let reason = reason.map(|r| sanitize_string(&r));
        if let Some(r) = &reason {
            validate_max_len("reason", r, CANCELLATION_REASON_MAX_LEN)?;
        }
        self.transition(id, Some(requester), RedemptionAction::Cancel { reason })
            .await
    }

    pub async fn approve(&self, id: Uuid) -> Result<RedemptionRequest, AppError> {
        self.transition(id, None, RedemptionAction::Approve).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<RedemptionRequest, AppError> {
        self.transition(id, None, RedemptionAction::Complete).await
    }

    pub async fn fail(&self, id: Uuid, error_message: String) -> Result<RedemptionRequest, AppError> {
        let error_message = sanitize_string(&error_message);
        validate_required("error_message", &error_message)?;
        validate_max_len("error_message", &error_message, ERROR_MESSAGE_MAX_LEN)?;
        self.transition(id, None, RedemptionAction::Fail { error_message })
            .await
    }

    /// Re-dispatches every armed event whose flag is still unclaimed.
    pub async fn redeliver_notifications(&self, id: Uuid) -> Result<RedeliveryReport, AppError> {
        let redemption = self.load(id).await?;
        let mut attempted = Vec::new();
        for event in redemption.unsent_events() {
            let outcome = self.dispatcher.dispatch(&redemption, event).await;
            attempted.push((event, outcome));
        }

        tracing::info!(
            redemption_id = %id,
            attempted = attempted.len(),
            "Notification redelivery finished"
        );
        Ok(RedeliveryReport {
            redemption_id: id,
            attempted,
        })
    }

    /// Read, apply, conditional write; re-read on a lost race.
    ///
    /// `owner` is checked on every attempt. The state check is repeated against the fresh
    /// record, so a racing writer that moved the record on turns into `InvalidState`.
    async fn transition(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        action: RedemptionAction,
    ) -> Result<RedemptionRequest, AppError> {
        let attempts = self.settings.max_retries.max(1);

        for attempt in 1..=attempts {
            let current = self.load(id).await?;
            if let Some(requester) = owner {
                if !current.is_owned_by(requester) {
                    return Err(AppError::Forbidden(format!(
                        "Redemption {} does not belong to the requester",
                        id
                    )));
                }
            }

            let (mut next, event) = current
                .apply(&action, Utc::now())
                .map_err(|e| AppError::InvalidState(e.to_string()))?;

            let swapped = bounded(
                self.settings.store_timeout,
                "update_redemption",
                self.repo.compare_and_swap(current.version, &next),
            )
            .await?;

            if swapped {
                tracing::info!(
                    redemption_id = %id,
                    from = %current.status,
                    to = %next.status,
                    action = action.name(),
                    "Redemption transitioned"
                );
                let outcome = self.dispatcher.dispatch(&next, event).await;
                next.notification_status.set(event, outcome.is_claimed());
                return Ok(next);
            }

            tracing::debug!(redemption_id = %id, attempt, "Lost redemption update race, retrying");
        }

        tracing::warn!(redemption_id = %id, action = action.name(), "Redemption update kept conflicting");
        Err(AppError::Conflict(format!(
            "Redemption {} was modified concurrently, retry the request",
            id
        )))
    }
}
