//! `LedgerSource` implementers, one per collection.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::{RedemptionStatus, TransactionKind, TransactionRecord, TransferStatus};
use crate::ports::{
    GiftRepository, LedgerSource, PurchaseRepository, RedemptionRepository, RepositoryResult,
    SourceFilter,
};

fn transfer_status(status: &str) -> Option<&'static str> {
    TransferStatus::from_str(status).ok().map(|s| s.as_str())
}

pub struct PurchaseSource {
    repo: Arc<dyn PurchaseRepository>,
}

impl PurchaseSource {
    pub fn new(repo: Arc<dyn PurchaseRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl LedgerSource for PurchaseSource {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Purchase
    }

    fn translate_status(&self, status: &str) -> Option<&'static str> {
        transfer_status(status)
    }

    async fn count_matching(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.repo.count(filter).await
    }

    async fn fetch_page(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<TransactionRecord>> {
        let rows = self.repo.find(filter, limit, offset).await?;
        Ok(rows.into_iter().map(TransactionRecord::from).collect())
    }
}

pub struct RedemptionSource {
    repo: Arc<dyn RedemptionRepository>,
}

impl RedemptionSource {
    pub fn new(repo: Arc<dyn RedemptionRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl LedgerSource for RedemptionSource {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Redemption
    }

    /// `processing` is what clients call an approved redemption.
    fn translate_status(&self, status: &str) -> Option<&'static str> {
        if status.eq_ignore_ascii_case("processing") {
            return Some(RedemptionStatus::Approved.as_str());
        }
        RedemptionStatus::from_str(status).ok().map(|s| s.as_str())
    }

    async fn count_matching(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.repo.count(filter).await
    }

    async fn fetch_page(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<TransactionRecord>> {
        let rows = self.repo.find(filter, limit, offset).await?;
        Ok(rows.into_iter().map(TransactionRecord::from).collect())
    }
}

pub struct GiftSource {
    repo: Arc<dyn GiftRepository>,
}

impl GiftSource {
    pub fn new(repo: Arc<dyn GiftRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl LedgerSource for GiftSource {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Gift
    }

    fn translate_status(&self, status: &str) -> Option<&'static str> {
        transfer_status(status)
    }

    async fn count_matching(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.repo.count(filter).await
    }

    /// Gifts are normalized from the side of the user the history belongs to.
    async fn fetch_page(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<TransactionRecord>> {
        let rows = self.repo.find(filter, limit, offset).await?;
        Ok(rows
            .into_iter()
            .map(|gift| gift.normalize_for(filter.user_id))
            .collect())
    }
}

/// The three shipped sources over one store implementing every repository.
pub fn default_sources<S>(store: Arc<S>) -> Vec<Arc<dyn LedgerSource>>
where
    S: PurchaseRepository + RedemptionRepository + GiftRepository + 'static,
{
    vec![
        Arc::new(PurchaseSource::new(store.clone())),
        Arc::new(RedemptionSource::new(store.clone())),
        Arc::new(GiftSource::new(store)),
    ]
}
