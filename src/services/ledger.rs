//! Ledger merge engine.
//!
//! Each participating source is asked for the `page * limit` most recent matching records
//! and its exact count, concurrently. The merged page is cut from the union of those
//! windows, which always contains the true first `page * limit` records of the combined
//! ordering.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{ledger_order, TransactionKind, TransactionRecord};
use crate::error::AppError;
use crate::ports::{LedgerSource, SourceFilter};
use crate::utils::timeout::bounded;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
/// Keeps `page * limit` inside `i64` for every accepted limit.
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;
/// Queries without a user return only this many of the most recent records.
pub const PLATFORM_WIDE_LIMIT: i64 = 10;

/// Filter shared by the paged view and the export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub user_id: Option<Uuid>,
    pub search: Option<String>,
    pub kind: Option<TransactionKind>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(AppError::InvalidArgument(format!(
                    "dateFrom {} is after dateTo {}",
                    from.to_rfc3339(),
                    to.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub filter: LedgerFilter,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_more: page.saturating_mul(limit) < total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub records: Vec<TransactionRecord>,
    pub total: i64,
    pub pagination: Pagination,
}

/// Validates `page`/`limit`, applying the defaults when absent.
pub fn resolve_pagination(page: Option<i64>, limit: Option<i64>) -> Result<(i64, i64), AppError> {
    let page = page.unwrap_or(DEFAULT_PAGE);
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_PAGE).contains(&page) {
        return Err(AppError::InvalidArgument(format!(
            "page must be between 1 and {}, got {}",
            MAX_PAGE, page
        )));
    }
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::InvalidArgument(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok((page, limit))
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_fetch_window: i64,
    pub store_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_fetch_window: 1000,
            store_timeout: Duration::from_millis(5000),
        }
    }
}

/// A source paired with the filter translated into its vocabulary.
#[derive(Clone)]
pub(crate) struct SourceQuery {
    pub source: Arc<dyn LedgerSource>,
    pub filter: SourceFilter,
}

#[derive(Clone)]
pub struct LedgerService {
    sources: Vec<Arc<dyn LedgerSource>>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(sources: Vec<Arc<dyn LedgerSource>>, config: LedgerConfig) -> Self {
        Self { sources, config }
    }

    /// Sources that can contribute to `filter`, each with its own translated filter.
    ///
    /// A kind filter drops the other sources; a status a source cannot carry drops that
    /// source instead of failing the query.
    pub(crate) fn plan(&self, filter: &LedgerFilter) -> Result<Vec<SourceQuery>, AppError> {
        filter.validate()?;

        let wanted_status = filter
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut plan = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if filter.kind.map_or(false, |kind| kind != source.kind()) {
                continue;
            }

            let status = match &wanted_status {
                Some(wanted) => match source.translate_status(wanted) {
                    Some(translated) => Some(translated.to_string()),
                    None => {
                        tracing::debug!(kind = %source.kind(), status = %wanted, "Status not carried by source");
                        continue;
                    }
                },
                None => None,
            };

            plan.push(SourceQuery {
                source: source.clone(),
                filter: SourceFilter {
                    user_id: filter.user_id,
                    status,
                    date_from: filter.date_from,
                    date_to: filter.date_to,
                    search: filter.search_term(),
                },
            });
        }

        Ok(plan)
    }

    /// Sum of the per-source counts for `filter`.
    pub async fn count(&self, filter: &LedgerFilter) -> Result<i64, AppError> {
        let plan = self.plan(filter)?;
        let timeout = self.config.store_timeout;
        let counts = try_join_all(plan.iter().map(|q| {
            bounded(timeout, "ledger_count", q.source.count_matching(&q.filter))
        }))
        .await?;
        Ok(counts.into_iter().sum())
    }

    pub async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage, AppError> {
        let (page, limit) = match query.filter.user_id {
            Some(_) => resolve_pagination(query.page, query.limit)?,
            None => (1, PLATFORM_WIDE_LIMIT),
        };

        let window = page
            .checked_mul(limit)
            .filter(|w| *w <= self.config.max_fetch_window);
        let Some(window) = window else {
            return Err(AppError::InvalidArgument(format!(
                "page {} with limit {} reaches past the {} most recent records",
                page, limit, self.config.max_fetch_window
            )));
        };

        let plan = self.plan(&query.filter)?;
        let timeout = self.config.store_timeout;

        let per_source = try_join_all(plan.iter().map(|q| async move {
            let (count, rows) = futures::future::try_join(
                bounded(timeout, "ledger_count", q.source.count_matching(&q.filter)),
                bounded(timeout, "ledger_fetch", q.source.fetch_page(&q.filter, window, 0)),
            )
            .await?;
            Ok::<_, AppError>((count, rows))
        }))
        .await?;

        let mut total = 0;
        let mut merged = Vec::new();
        for (count, rows) in per_source {
            total += count;
            merged.extend(rows);
        }
        merged.sort_by(ledger_order);

        let records: Vec<TransactionRecord> = merged
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        tracing::debug!(
            user_id = ?query.filter.user_id,
            page,
            limit,
            total,
            returned = records.len(),
            "Ledger page assembled"
        );

        Ok(HistoryPage {
            records,
            total,
            pagination: Pagination::new(page, limit, total),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::ports::{GiftRepository, PurchaseRepository, RedemptionRepository};
    use crate::services::sources::default_sources;

    fn service(store: Arc<InMemoryStore>) -> LedgerService {
        LedgerService::new(default_sources(store), LedgerConfig::default())
    }

    fn for_user(user: Uuid, page: i64, limit: i64) -> HistoryQuery {
        HistoryQuery {
            filter: LedgerFilter {
                user_id: Some(user),
                ..Default::default()
            },
            page: Some(page),
            limit: Some(limit),
        }
    }

    #[tokio::test]
    async fn merges_with_id_tie_break() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        PurchaseRepository::insert(store.as_ref(), &purchase(user, 5, 10)).await.unwrap();
        RedemptionRepository::insert(store.as_ref(), &redemption_at(user, 9, 20)).await.unwrap();
        GiftRepository::insert(store.as_ref(), &gift(user, None, 3, 20)).await.unwrap();

        let page = service(store).query(&for_user(user, 1, 2)).await.unwrap();

        let kinds: Vec<_> = page.records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![TransactionKind::Gift, TransactionKind::Redemption]);
        assert_eq!(page.total, 3);
        assert_eq!(page.pagination.total_pages, 2);
        assert!(page.pagination.has_more);
    }

    #[tokio::test]
    async fn pages_partition_the_merged_order() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        seed_mixed(&store, user, 0).await;
        let ledger = service(store);

        let mut walked = Vec::new();
        for page in 1..=5 {
            let result = ledger.query(&for_user(user, page, 5)).await.unwrap();
            assert_eq!(result.total, 21);
            walked.extend(result.records);
        }
        assert_eq!(walked.len(), 21);

        for pair in walked.windows(2) {
            assert!(pair[0].occurred_at >= pair[1].occurred_at);
            if pair[0].occurred_at == pair[1].occurred_at {
                assert!(pair[0].id <= pair[1].id);
            }
        }

        let all = ledger.query(&for_user(user, 1, 100)).await.unwrap();
        assert_eq!(all.records, walked);
    }

    #[tokio::test]
    async fn identical_queries_return_identical_pages() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        seed_mixed(&store, user, 0).await;
        let ledger = service(store);

        let first = ledger.query(&for_user(user, 2, 4)).await.unwrap();
        let second = ledger.query(&for_user(user, 2, 4)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn kind_filter_selects_sources() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        seed_mixed(&store, user, 0).await;

        let mut query = for_user(user, 1, 100);
        query.filter.kind = Some(TransactionKind::Gift);
        let page = service(store).query(&query).await.unwrap();

        assert_eq!(page.total, 7);
        assert!(page.records.iter().all(|r| r.kind == TransactionKind::Gift));
    }

    #[tokio::test]
    async fn status_outside_vocabulary_contributes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        seed_mixed(&store, user, 0).await;
        let ledger = service(store);

        let mut query = for_user(user, 1, 100);
        query.filter.status = Some("cancelled".to_string());
        let page = ledger.query(&query).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.records.is_empty());

        query.filter.status = Some("Pending".to_string());
        let page = ledger.query(&query).await.unwrap();
        assert_eq!(page.total, 7);
        assert!(page.records.iter().all(|r| r.kind == TransactionKind::Redemption));
    }

    #[tokio::test]
    async fn gifts_appear_in_both_histories() {
        let store = Arc::new(InMemoryStore::new());
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        GiftRepository::insert(store.as_ref(), &gift(sender, Some(recipient), 1, 0))
            .await
            .unwrap();
        let ledger = service(store);

        let sent = ledger.query(&for_user(sender, 1, 10)).await.unwrap();
        let received = ledger.query(&for_user(recipient, 1, 10)).await.unwrap();

        assert_eq!(sent.records[0].subtype, "sent");
        assert_eq!(received.records[0].subtype, "received");
        assert_eq!(received.records[0].wallet_address, "0x6666ffff7777aaaa8888bbbb9999cccc0000dddd");
    }

    #[tokio::test]
    async fn search_is_counted_exactly() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        seed_mixed(&store, user, 0).await;

        let mut query = for_user(user, 1, 10);
        query.filter.search = Some("0XPURCHASE010".to_string());
        let page = service(store).query(&query).await.unwrap();

        assert_eq!(page.total, 7);
        assert!(page.records.iter().all(|r| r.kind == TransactionKind::Purchase));
    }

    #[tokio::test]
    async fn rejects_inverted_date_range() {
        let ledger = service(Arc::new(InMemoryStore::new()));
        let mut query = for_user(Uuid::new_v4(), 1, 10);
        query.filter.date_from = Some(at(100));
        query.filter.date_to = Some(at(0));

        let err = ledger.query(&query).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rejects_out_of_range_pagination() {
        let ledger = service(Arc::new(InMemoryStore::new()));
        let user = Uuid::new_v4();

        for (page, limit) in [(0, 10), (1, 0), (1, 101)] {
            let err = ledger.query(&for_user(user, page, limit)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)), "{} {}", page, limit);
        }
    }

    #[tokio::test]
    async fn rejects_window_past_ceiling() {
        let ledger = service(Arc::new(InMemoryStore::new()));
        let err = ledger
            .query(&for_user(Uuid::new_v4(), 11, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn huge_pages_are_rejected_without_overflow() {
        let ledger = service(Arc::new(InMemoryStore::new()));
        let user = Uuid::new_v4();

        for page in [i64::MAX / 50, MAX_PAGE, i64::MAX] {
            let err = ledger.query(&for_user(user, page, 100)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)), "page {}", page);
        }
        assert!(resolve_pagination(Some(MAX_PAGE), Some(MAX_LIMIT)).is_ok());
        assert!(resolve_pagination(Some(MAX_PAGE + 1), Some(1)).is_err());
    }

    #[tokio::test]
    async fn platform_wide_query_is_capped() {
        let store = Arc::new(InMemoryStore::new());
        seed_mixed(&store, Uuid::new_v4(), 0).await;
        seed_mixed(&store, Uuid::new_v4(), 1000).await;

        let query = HistoryQuery {
            filter: LedgerFilter::default(),
            page: Some(3),
            limit: Some(50),
        };
        let page = service(store).query(&query).await.unwrap();

        assert_eq!(page.records.len(), PLATFORM_WIDE_LIMIT as usize);
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.limit, PLATFORM_WIDE_LIMIT);
    }

    #[tokio::test]
    async fn slow_store_surfaces_timeout() {
        let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(200)));
        let ledger = LedgerService::new(
            default_sources(store),
            LedgerConfig {
                max_fetch_window: 1000,
                store_timeout: Duration::from_millis(20),
            },
        );

        let err = ledger.query(&for_user(Uuid::new_v4(), 1, 10)).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn pagination_math() {
        let p = Pagination::new(2, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);

        let last = Pagination::new(3, 10, 25);
        assert!(!last.has_more);
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert!(!Pagination::new(MAX_PAGE, MAX_LIMIT, 5).has_more);
    }
}
