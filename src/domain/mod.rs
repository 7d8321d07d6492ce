//! Framework-agnostic ledger entities.

pub mod gift;
pub mod purchase;
pub mod redemption;
pub mod transaction;

pub use gift::GiftRecord;
pub use purchase::{PurchaseRecord, TransferStatus};
pub use redemption::{
    InvalidTransition, NotificationEvent, NotificationStatus, RedemptionAction,
    RedemptionRequest, RedemptionStatus,
};
pub use transaction::{ledger_order, Metal, TransactionKind, TransactionRecord};
