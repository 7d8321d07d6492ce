//! Redemption lifecycle.
//!
//! `RedemptionRequest::apply` is the pure transition function: it never mutates the
//! receiver and returns the next record plus the notification the transition arms.
//! Persistence and concurrency are handled by `services::redemption`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::transaction::{Metal, TransactionKind, TransactionRecord};

pub const DEFAULT_CANCELLATION_REASON: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Completed,
    Failed,
    Cancelled,
}

impl RedemptionStatus {
    pub const ALL: [RedemptionStatus; 5] = [
        RedemptionStatus::Pending,
        RedemptionStatus::Approved,
        RedemptionStatus::Completed,
        RedemptionStatus::Failed,
        RedemptionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Approved => "approved",
            RedemptionStatus::Completed => "completed",
            RedemptionStatus::Failed => "failed",
            RedemptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RedemptionStatus::Completed | RedemptionStatus::Failed | RedemptionStatus::Cancelled
        )
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RedemptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown redemption status '{}'", s))
    }
}

/// Externally observable lifecycle events, one dedup flag each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Requested,
    Processing,
    Fulfilled,
    Cancelled,
    Failed,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::Requested => "requested",
            NotificationEvent::Processing => "processing",
            NotificationEvent::Fulfilled => "fulfilled",
            NotificationEvent::Cancelled => "cancelled",
            NotificationEvent::Failed => "failed",
        }
    }

    /// Column backing this event's flag in the redemptions table.
    pub fn flag_column(&self) -> &'static str {
        match self {
            NotificationEvent::Requested => "request_notified",
            NotificationEvent::Processing => "processing_notified",
            NotificationEvent::Fulfilled => "fulfilled_notified",
            NotificationEvent::Cancelled => "cancelled_notified",
            NotificationEvent::Failed => "failed_notified",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-event delivery flags. Deliberately independent of `RedemptionStatus`:
/// "processing" is signalled while the status is still `approved`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatus {
    pub request_notified: bool,
    pub processing_notified: bool,
    pub fulfilled_notified: bool,
    pub cancelled_notified: bool,
    pub failed_notified: bool,
}

impl NotificationStatus {
    pub fn get(&self, event: NotificationEvent) -> bool {
        match event {
            NotificationEvent::Requested => self.request_notified,
            NotificationEvent::Processing => self.processing_notified,
            NotificationEvent::Fulfilled => self.fulfilled_notified,
            NotificationEvent::Cancelled => self.cancelled_notified,
            NotificationEvent::Failed => self.failed_notified,
        }
    }

    pub fn set(&mut self, event: NotificationEvent, value: bool) {
        let flag = match event {
            NotificationEvent::Requested => &mut self.request_notified,
            NotificationEvent::Processing => &mut self.processing_notified,
            NotificationEvent::Fulfilled => &mut self.fulfilled_notified,
            NotificationEvent::Cancelled => &mut self.cancelled_notified,
            NotificationEvent::Failed => &mut self.failed_notified,
        };
        *flag = value;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionAction {
    Approve,
    Cancel { reason: Option<String> },
    Complete,
    Fail { error_message: String },
}

impl RedemptionAction {
    pub fn name(&self) -> &'static str {
        match self {
            RedemptionAction::Approve => "approve",
            RedemptionAction::Cancel { .. } => "cancel",
            RedemptionAction::Complete => "complete",
            RedemptionAction::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} a redemption in status {from}")]
pub struct InvalidTransition {
    pub from: RedemptionStatus,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_address: String,
    pub metal: Metal,
    pub quantity: i32,
    pub grams_amount: BigDecimal,
    pub token_amount: BigDecimal,
    pub token_value_usd: BigDecimal,
    pub platform_fee_usd: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub total_cost_usd: BigDecimal,
    pub delivery_method: String,
    pub network: String,
    pub transaction_hash: Option<String>,
    pub status: RedemptionStatus,
    pub notification_status: NotificationStatus,
    pub cancellation_reason: Option<String>,
    pub error_message: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl RedemptionRequest {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    /// Applies `action` at time `now`.
    ///
    /// Only the edges of the lifecycle table are legal; everything else, including any
    /// action on a terminal record, yields `InvalidTransition` and no new record.
    pub fn apply(
        &self,
        action: &RedemptionAction,
        now: DateTime<Utc>,
    ) -> Result<(RedemptionRequest, NotificationEvent), InvalidTransition> {
        use RedemptionStatus::*;

        let invalid = || InvalidTransition {
            from: self.status,
            action: action.name(),
        };

        let mut next = self.clone();
        let event = match (self.status, action) {
            (Pending, RedemptionAction::Approve) => {
                next.status = Approved;
                next.approved_at = Some(now);
                NotificationEvent::Processing
            }
            (Pending | Approved, RedemptionAction::Cancel { reason }) => {
                next.status = Cancelled;
                next.cancellation_reason = Some(
                    reason
                        .as_deref()
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .unwrap_or(DEFAULT_CANCELLATION_REASON)
                        .to_string(),
                );
                next.cancelled_at = Some(now);
                NotificationEvent::Cancelled
            }
            (Approved, RedemptionAction::Complete) => {
                next.status = Completed;
                next.completed_at = Some(now);
                NotificationEvent::Fulfilled
            }
            (Pending | Approved, RedemptionAction::Fail { error_message }) => {
                next.status = Failed;
                next.error_message = Some(error_message.clone());
                next.failed_at = Some(now);
                NotificationEvent::Failed
            }
            _ => return Err(invalid()),
        };

        next.updated_at = now;
        next.version = self.version + 1;
        Ok((next, event))
    }

    /// Events the record's history has armed so far, in lifecycle order.
    pub fn armed_events(&self) -> Vec<NotificationEvent> {
        let mut events = vec![NotificationEvent::Requested];
        if self.approved_at.is_some() {
            events.push(NotificationEvent::Processing);
        }
        match self.status {
            RedemptionStatus::Completed => events.push(NotificationEvent::Fulfilled),
            RedemptionStatus::Cancelled => events.push(NotificationEvent::Cancelled),
            RedemptionStatus::Failed => events.push(NotificationEvent::Failed),
            RedemptionStatus::Pending | RedemptionStatus::Approved => {}
        }
        events
    }

    /// Armed events whose dedup flag has not been claimed.
    pub fn unsent_events(&self) -> Vec<NotificationEvent> {
        self.armed_events()
            .into_iter()
            .filter(|event| !self.notification_status.get(*event))
            .collect()
    }
}

impl From<RedemptionRequest> for TransactionRecord {
    fn from(redemption: RedemptionRequest) -> Self {
        let mut details = serde_json::Map::new();
        details.insert("userId".into(), redemption.user_id.to_string().into());
        details.insert("quantity".into(), redemption.quantity.into());
        details.insert("gramsAmount".into(), redemption.grams_amount.to_string().into());
        details.insert("deliveryFee".into(), redemption.delivery_fee.to_string().into());
        details.insert("totalCostUsd".into(), redemption.total_cost_usd.to_string().into());
        if let Some(reason) = redemption.cancellation_reason {
            details.insert("cancellationReason".into(), reason.into());
        }
        if let Some(error) = redemption.error_message {
            details.insert("errorMessage".into(), error.into());
        }

        TransactionRecord {
            id: redemption.id,
            kind: TransactionKind::Redemption,
            subtype: redemption.delivery_method,
            metal: redemption.metal,
            token_amount: redemption.token_amount,
            usd_value: redemption.token_value_usd,
            fee_amount: redemption.platform_fee_usd + redemption.delivery_fee,
            status: redemption.status.as_str().to_string(),
            occurred_at: redemption.created_at,
            wallet_address: redemption.wallet_address,
            transaction_hash: redemption.transaction_hash,
            network: redemption.network,
            details,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn redemption(user_id: Uuid, status: RedemptionStatus) -> RedemptionRequest {
        let now = Utc::now();
        RedemptionRequest {
            id: Uuid::new_v4(),
            user_id,
            wallet_address: "0x9f8e7d6c5b4a39281706f5e4d3c2b1a098765432".to_string(),
            metal: Metal::Gold,
            quantity: 1,
            grams_amount: BigDecimal::from(10),
            token_amount: BigDecimal::from(10),
            token_value_usd: BigDecimal::from_str("650.00").unwrap(),
            platform_fee_usd: BigDecimal::from_str("16.25").unwrap(),
            delivery_fee: BigDecimal::from(25),
            total_cost_usd: BigDecimal::from_str("691.25").unwrap(),
            delivery_method: "courier".to_string(),
            network: "ethereum".to_string(),
            transaction_hash: None,
            status,
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
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::redemption;
    use super::*;

    fn actions() -> Vec<RedemptionAction> {
        vec![
            RedemptionAction::Approve,
            RedemptionAction::Cancel { reason: None },
            RedemptionAction::Complete,
            RedemptionAction::Fail {
                error_message: "vault offline".to_string(),
            },
        ]
    }

    fn is_legal(from: RedemptionStatus, action: &RedemptionAction) -> bool {
        use RedemptionStatus::*;
        matches!(
            (from, action),
            (Pending, RedemptionAction::Approve)
                | (Pending | Approved, RedemptionAction::Cancel { .. })
                | (Approved, RedemptionAction::Complete)
                | (Pending | Approved, RedemptionAction::Fail { .. })
        )
    }

    #[test]
    fn illegal_transitions_are_rejected_without_changes() {
        let now = Utc::now();
        for status in RedemptionStatus::ALL {
            for action in actions() {
                let record = redemption(Uuid::new_v4(), status);
                let before = record.clone();
                let result = record.apply(&action, now);
                if is_legal(status, &action) {
                    assert!(result.is_ok(), "{status} / {} should be legal", action.name());
                } else {
                    assert_eq!(
                        result,
                        Err(InvalidTransition {
                            from: status,
                            action: action.name()
                        })
                    );
                }
                assert_eq!(record, before);
            }
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for status in RedemptionStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            let record = redemption(Uuid::new_v4(), status);
            for action in actions() {
                assert!(record.apply(&action, Utc::now()).is_err());
            }
        }
    }

    #[test]
    fn approve_sets_timestamp_and_arms_processing() {
        let record = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        let now = Utc::now();
        let (next, event) = record.apply(&RedemptionAction::Approve, now).unwrap();

        assert_eq!(next.status, RedemptionStatus::Approved);
        assert_eq!(next.approved_at, Some(now));
        assert_eq!(next.updated_at, now);
        assert_eq!(next.version, record.version + 1);
        assert_eq!(event, NotificationEvent::Processing);
    }

    #[test]
    fn cancel_defaults_reason() {
        let record = redemption(Uuid::new_v4(), RedemptionStatus::Approved);
        let (next, event) = record
            .apply(&RedemptionAction::Cancel { reason: Some("  ".into()) }, Utc::now())
            .unwrap();

        assert_eq!(next.status, RedemptionStatus::Cancelled);
        assert_eq!(next.cancellation_reason.as_deref(), Some(DEFAULT_CANCELLATION_REASON));
        assert!(next.cancelled_at.is_some());
        assert_eq!(event, NotificationEvent::Cancelled);
    }

    #[test]
    fn failure_is_its_own_event() {
        let record = redemption(Uuid::new_v4(), RedemptionStatus::Approved);
        let (next, event) = record
            .apply(
                &RedemptionAction::Fail {
                    error_message: "courier rejected".into(),
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(event, NotificationEvent::Failed);
        assert_eq!(next.error_message.as_deref(), Some("courier rejected"));
        assert!(next.cancellation_reason.is_none());
    }

    #[test]
    fn armed_events_follow_history() {
        let mut record = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        assert_eq!(record.armed_events(), vec![NotificationEvent::Requested]);

        record = record.apply(&RedemptionAction::Approve, Utc::now()).unwrap().0;
        record = record.apply(&RedemptionAction::Complete, Utc::now()).unwrap().0;
        assert_eq!(
            record.armed_events(),
            vec![
                NotificationEvent::Requested,
                NotificationEvent::Processing,
                NotificationEvent::Fulfilled
            ]
        );

        record.notification_status.request_notified = true;
        assert_eq!(
            record.unsent_events(),
            vec![NotificationEvent::Processing, NotificationEvent::Fulfilled]
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in RedemptionStatus::ALL {
            assert_eq!(status.as_str().parse::<RedemptionStatus>(), Ok(status));
        }
        assert!("processing".parse::<RedemptionStatus>().is_err());
    }
}
