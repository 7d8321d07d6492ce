//! Redemption notifications.
//!
//! Delivery is at-most-once per (redemption, event): the dispatcher claims the event's
//! flag after the transition has been committed, calls the sender, and releases the
//! claim again only when delivery definitively failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{NotificationEvent, RedemptionRequest, RedemptionStatus};
use crate::error::AppError;
use crate::ports::NotificationFlagStore;
use crate::utils::sanitize::mask_wallet;
use crate::utils::timeout::bounded;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Ledger-Signature";

/// Payload handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub redemption_id: Uuid,
    pub user_id: Uuid,
    pub event: NotificationEvent,
    pub status: RedemptionStatus,
    pub wallet_address: String,
    pub total_cost_usd: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_event(redemption: &RedemptionRequest, event: NotificationEvent) -> Self {
        let reason = match event {
            NotificationEvent::Cancelled => redemption.cancellation_reason.clone(),
            NotificationEvent::Failed => redemption.error_message.clone(),
            _ => None,
        };

        Self {
            redemption_id: redemption.id,
            user_id: redemption.user_id,
            event,
            status: redemption.status,
            wallet_address: redemption.wallet_address.clone(),
            total_cost_usd: redemption.total_cost_usd.to_string(),
            reason,
            occurred_at: redemption.updated_at,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Endpoint rejected notification with status {0}")]
    Rejected(u16),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Failed to encode notification: {0}")]
    Encode(String),
}

/// Delivery transport (email/SMS/webhook). Out-of-process; may fail.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Sender used when no webhook endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            redemption_id = %notification.redemption_id,
            event = %notification.event,
            wallet = %mask_wallet(&notification.wallet_address),
            "Notification emitted"
        );
        Ok(())
    }
}

/// Posts signed JSON notifications to a webhook endpoint behind a circuit breaker.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: String) -> Self {
        Self::with_circuit_breaker(url, secret, 3, 60)
    }

    pub fn with_circuit_breaker(
        url: String,
        secret: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            url,
            secret,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Hex-encoded HMAC-SHA256 of `body` under the shared secret.
    pub fn sign(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let body =
            serde_json::to_vec(notification).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let signature = Self::sign(&self.secret, &body)?;
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body);

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(DeliveryError::Rejected(response.status().as_u16()));
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(FailsafeError::Rejected) => Err(DeliveryError::CircuitBreakerOpen(
                "notification webhook circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

/// At-most-once bookkeeping over the per-event flags.
#[derive(Clone)]
pub struct NotificationDedupLedger {
    store: Arc<dyn NotificationFlagStore>,
    timeout: Duration,
}

impl NotificationDedupLedger {
    pub fn new(store: Arc<dyn NotificationFlagStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// `true` exactly once per (redemption, event) until released.
    pub async fn try_claim(
        &self,
        redemption_id: Uuid,
        event: NotificationEvent,
    ) -> Result<bool, AppError> {
        bounded(
            self.timeout,
            "try_claim_notification",
            self.store.try_claim(redemption_id, event),
        )
        .await
    }

    pub async fn release(
        &self,
        redemption_id: Uuid,
        event: NotificationEvent,
    ) -> Result<(), AppError> {
        bounded(
            self.timeout,
            "release_notification",
            self.store.release(redemption_id, event),
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered,
    /// Another caller already claimed the event.
    AlreadyClaimed,
    /// Delivery failed; the claim was released for a later retry.
    Failed,
}

impl DispatchOutcome {
    /// Whether the event's flag is held after the dispatch.
    pub fn is_claimed(&self) -> bool {
        !matches!(self, DispatchOutcome::Failed)
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    ledger: NotificationDedupLedger,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationDispatcher {
    pub fn new(ledger: NotificationDedupLedger, sender: Arc<dyn NotificationSender>) -> Self {
        Self { ledger, sender }
    }

    /// Delivers `event` for an already committed redemption state.
    ///
    /// Never fails the caller's transition: store and delivery errors are logged and
    /// reported through the outcome.
    pub async fn dispatch(
        &self,
        redemption: &RedemptionRequest,
        event: NotificationEvent,
    ) -> DispatchOutcome {
        match self.ledger.try_claim(redemption.id, event).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(redemption_id = %redemption.id, event = %event, "Notification already claimed");
                return DispatchOutcome::AlreadyClaimed;
            }
            Err(e) => {
                tracing::error!(redemption_id = %redemption.id, event = %event, error = %e, "Failed to claim notification");
                return DispatchOutcome::Failed;
            }
        }

        let notification = Notification::for_event(redemption, event);
        match self.sender.send(&notification).await {
            Ok(()) => {
                tracing::info!(redemption_id = %redemption.id, event = %event, "Notification delivered");
                DispatchOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(redemption_id = %redemption.id, event = %event, error = %e, "Notification delivery failed");
                if let Err(release_err) = self.ledger.release(redemption.id, event).await {
                    tracing::error!(
                        redemption_id = %redemption.id,
                        event = %event,
                        error = %release_err,
                        "Failed to release notification claim"
                    );
                }
                DispatchOutcome::Failed
            }
        }
    }
}
