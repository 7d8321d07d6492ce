//! Record Store seams.
//!
//! Services only see these traits; `adapters::postgres` and `adapters::memory`
//! provide the implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    GiftRecord, NotificationEvent, PurchaseRecord, RedemptionRequest, TransactionKind,
    TransactionRecord,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),
    /// A unique constraint rejected the write.
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(String),
    /// A stored row failed to decode into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                RepositoryError::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                RepositoryError::Corrupt(err.to_string())
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Filter already translated into one collection's vocabulary.
///
/// `status` holds the collection's own status string; date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl SourceFilter {
    pub fn contains_date(&self, at: DateTime<Utc>) -> bool {
        self.date_from.map_or(true, |from| at >= from) && self.date_to.map_or(true, |to| at <= to)
    }

    pub fn matches_status(&self, status: &str) -> bool {
        self.status.as_deref().map_or(true, |wanted| wanted == status)
    }

    /// SQL `ILIKE` pattern for the search term, with wildcards escaped.
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                let escaped = term
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                format!("%{}%", escaped)
            })
    }
}

#[async_trait]
pub trait RedemptionRepository: Send + Sync {
    async fn insert(&self, redemption: &RedemptionRequest) -> RepositoryResult<RedemptionRequest>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<RedemptionRequest>>;

    /// Newest first, ties by id ascending.
    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<RedemptionRequest>>;

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64>;

    /// Writes `next` only if the stored version still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &RedemptionRequest,
    ) -> RepositoryResult<bool>;
}

/// Atomic per-(redemption, event) notification flags.
#[async_trait]
pub trait NotificationFlagStore: Send + Sync {
    /// Flips the flag from false to true. `true` only for the caller that flipped it.
    async fn try_claim(&self, redemption_id: Uuid, event: NotificationEvent)
        -> RepositoryResult<bool>;

    /// Flips a claimed flag back to false.
    async fn release(&self, redemption_id: Uuid, event: NotificationEvent) -> RepositoryResult<()>;
}

#[async_trait]
pub trait PurchaseRepository: Send + Sync {
    async fn insert(&self, purchase: &PurchaseRecord) -> RepositoryResult<PurchaseRecord>;

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<PurchaseRecord>>;

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64>;
}

/// Gifts match a `user_id` filter as either sender or recipient.
#[async_trait]
pub trait GiftRepository: Send + Sync {
    async fn insert(&self, gift: &GiftRecord) -> RepositoryResult<GiftRecord>;

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<GiftRecord>>;

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64>;
}

/// One collection participating in the merged ledger.
///
/// Implementers translate the common status vocabulary, count and fetch matching rows
/// and return them already normalized. The merge never inspects the kind of a record.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    fn kind(&self) -> TransactionKind;

    /// Maps a common-vocabulary status onto this collection's own status, or `None`
    /// when no record of this collection can carry it.
    fn translate_status(&self, status: &str) -> Option<&'static str>;

    async fn count_matching(&self, filter: &SourceFilter) -> RepositoryResult<i64>;

    /// Ledger-ordered slice `[offset, offset + limit)` of the matching records.
    async fn fetch_page(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<TransactionRecord>>;
}
