pub mod export;
pub mod fees;
pub mod ledger;
pub mod notifications;
pub mod purchase;
pub mod redemption;
pub mod sources;

pub use export::{ExportFormat, ExportService};
pub use fees::FeeConfig;
pub use ledger::{HistoryQuery, LedgerFilter, LedgerService};
pub use notifications::{NotificationDedupLedger, NotificationDispatcher};
pub use purchase::TransferService;
pub use redemption::RedemptionService;
