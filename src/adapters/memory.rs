//! In-memory Record Store.
//!
//! Backs tests and the `serve --in-memory` development mode. Each collection sits behind
//! its own lock; conditional writes and flag claims happen under the write lock so they
//! are atomic with respect to each other.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{GiftRecord, NotificationEvent, PurchaseRecord, RedemptionRequest};
use crate::ports::{
    GiftRepository, NotificationFlagStore, PurchaseRepository, RedemptionRepository,
    RepositoryError, RepositoryResult, SourceFilter,
};

#[derive(Default)]
pub struct InMemoryStore {
    redemptions: RwLock<HashMap<Uuid, RedemptionRequest>>,
    purchases: RwLock<Vec<PurchaseRecord>>,
    gifts: RwLock<Vec<GiftRecord>>,
    latency: Option<Duration>,
    reads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, for exercising store timeouts.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Number of `find`/`count` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn simulate_io(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await;
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn search_term(filter: &SourceFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
}

fn page<T: Clone>(rows: Vec<&T>, limit: i64, offset: i64) -> Vec<T> {
    rows.into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

fn redemption_matches(r: &RedemptionRequest, filter: &SourceFilter) -> bool {
    filter.user_id.map_or(true, |user| r.user_id == user)
        && filter.matches_status(r.status.as_str())
        && filter.contains_date(r.created_at)
        && search_term(filter).map_or(true, |term| {
            contains_ci(&r.id.to_string(), &term)
                || contains_ci(&r.wallet_address, &term)
                || r.transaction_hash.as_deref().map_or(false, |h| contains_ci(h, &term))
        })
}

fn purchase_matches(p: &PurchaseRecord, filter: &SourceFilter) -> bool {
    filter.user_id.map_or(true, |user| p.user_id == user)
        && filter.matches_status(p.status.as_str())
        && filter.contains_date(p.created_at)
        && search_term(filter).map_or(true, |term| {
            contains_ci(&p.id.to_string(), &term)
                || contains_ci(&p.wallet_address, &term)
                || p.transaction_hash.as_deref().map_or(false, |h| contains_ci(h, &term))
        })
}

fn gift_matches(g: &GiftRecord, filter: &SourceFilter) -> bool {
    filter.user_id.map_or(true, |user| g.involves(user))
        && filter.matches_status(g.status.as_str())
        && filter.contains_date(g.created_at)
        && search_term(filter).map_or(true, |term| {
            contains_ci(&g.id.to_string(), &term)
                || contains_ci(&g.sender_wallet, &term)
                || contains_ci(&g.recipient_wallet, &term)
                || g.transaction_hash.as_deref().map_or(false, |h| contains_ci(h, &term))
        })
}

fn duplicate_hash<'a, I>(mut existing: I, hash: Option<&str>) -> RepositoryResult<()>
where
    I: Iterator<Item = Option<&'a str>>,
{
    if let Some(hash) = hash {
        if existing.any(|other| other == Some(hash)) {
            return Err(RepositoryError::Duplicate(format!(
                "transaction hash {} already recorded",
                hash
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl RedemptionRepository for InMemoryStore {
    async fn insert(&self, redemption: &RedemptionRequest) -> RepositoryResult<RedemptionRequest> {
        self.simulate_io().await;
        let mut redemptions = self.redemptions.write().await;
        if redemptions.contains_key(&redemption.id) {
            return Err(RepositoryError::Duplicate(format!("redemption {}", redemption.id)));
        }
        duplicate_hash(
            redemptions.values().map(|r| r.transaction_hash.as_deref()),
            redemption.transaction_hash.as_deref(),
        )?;
        redemptions.insert(redemption.id, redemption.clone());
        Ok(redemption.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<RedemptionRequest>> {
        self.simulate_io().await;
        Ok(self.redemptions.read().await.get(&id).cloned())
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<RedemptionRequest>> {
        self.record_read().await;
        let redemptions = self.redemptions.read().await;
        let mut rows: Vec<&RedemptionRequest> = redemptions
            .values()
            .filter(|r| redemption_matches(r, filter))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.record_read().await;
        let redemptions = self.redemptions.read().await;
        Ok(redemptions.values().filter(|r| redemption_matches(r, filter)).count() as i64)
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &RedemptionRequest,
    ) -> RepositoryResult<bool> {
        self.simulate_io().await;
        let mut redemptions = self.redemptions.write().await;
        match redemptions.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                // Flags are owned by the dedup ledger, not by the transition.
                let flags = current.notification_status;
                *current = next.clone();
                current.notification_status = flags;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("redemption {}", next.id))),
        }
    }
}

#[async_trait]
impl NotificationFlagStore for InMemoryStore {
    async fn try_claim(
        &self,
        redemption_id: Uuid,
        event: NotificationEvent,
    ) -> RepositoryResult<bool> {
        self.simulate_io().await;
        let mut redemptions = self.redemptions.write().await;
        let record = redemptions
            .get_mut(&redemption_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("redemption {}", redemption_id)))?;
        if record.notification_status.get(event) {
            return Ok(false);
        }
        record.notification_status.set(event, true);
        Ok(true)
    }

    async fn release(&self, redemption_id: Uuid, event: NotificationEvent) -> RepositoryResult<()> {
        self.simulate_io().await;
        let mut redemptions = self.redemptions.write().await;
        let record = redemptions
            .get_mut(&redemption_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("redemption {}", redemption_id)))?;
        record.notification_status.set(event, false);
        Ok(())
    }
}

#[async_trait]
impl PurchaseRepository for InMemoryStore {
    async fn insert(&self, purchase: &PurchaseRecord) -> RepositoryResult<PurchaseRecord> {
        self.simulate_io().await;
        let mut purchases = self.purchases.write().await;
        duplicate_hash(
            purchases.iter().map(|p| p.transaction_hash.as_deref()),
            purchase.transaction_hash.as_deref(),
        )?;
        purchases.push(purchase.clone());
        Ok(purchase.clone())
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<PurchaseRecord>> {
        self.record_read().await;
        let purchases = self.purchases.read().await;
        let mut rows: Vec<&PurchaseRecord> =
            purchases.iter().filter(|p| purchase_matches(p, filter)).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.record_read().await;
        let purchases = self.purchases.read().await;
        Ok(purchases.iter().filter(|p| purchase_matches(p, filter)).count() as i64)
    }
}

#[async_trait]
impl GiftRepository for InMemoryStore {
    async fn insert(&self, gift: &GiftRecord) -> RepositoryResult<GiftRecord> {
        self.simulate_io().await;
        let mut gifts = self.gifts.write().await;
        duplicate_hash(
            gifts.iter().map(|g| g.transaction_hash.as_deref()),
            gift.transaction_hash.as_deref(),
        )?;
        gifts.push(gift.clone());
        Ok(gift.clone())
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<GiftRecord>> {
        self.record_read().await;
        let gifts = self.gifts.read().await;
        let mut rows: Vec<&GiftRecord> = gifts.iter().filter(|g| gift_matches(g, filter)).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        self.record_read().await;
        let gifts = self.gifts.read().await;
        Ok(gifts.iter().filter(|g| gift_matches(g, filter)).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::redemption::fixtures::redemption;
    use crate::domain::RedemptionStatus;

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_versions() {
        let store = InMemoryStore::new();
        let record = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        RedemptionRepository::insert(&store, &record).await.unwrap();

        let mut next = record.clone();
        next.status = RedemptionStatus::Approved;
        next.version = 1;

        assert!(store.compare_and_swap(0, &next).await.unwrap());
        assert!(!store.compare_and_swap(0, &next).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_swap_keeps_claimed_flags() {
        let store = InMemoryStore::new();
        let record = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        RedemptionRepository::insert(&store, &record).await.unwrap();
        assert!(store.try_claim(record.id, NotificationEvent::Requested).await.unwrap());

        let mut next = record.clone();
        next.version = 1;
        assert!(store.compare_and_swap(0, &next).await.unwrap());

        let stored = store.find_by_id(record.id).await.unwrap().unwrap();
        assert!(stored.notification_status.request_notified);
    }

    #[tokio::test]
    async fn duplicate_transaction_hash_is_rejected() {
        let store = InMemoryStore::new();
        let mut first = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        first.transaction_hash = Some("0xfeed".to_string());
        let mut second = redemption(Uuid::new_v4(), RedemptionStatus::Pending);
        second.transaction_hash = Some("0xfeed".to_string());

        RedemptionRepository::insert(&store, &first).await.unwrap();
        let result = RedemptionRepository::insert(&store, &second).await;
        assert!(matches!(result, Err(RepositoryError::Duplicate(_))));
    }

    #[tokio::test]
    async fn find_orders_newest_first() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let mut old = redemption(user, RedemptionStatus::Pending);
        old.created_at = old.created_at - chrono::Duration::hours(1);
        let new = redemption(user, RedemptionStatus::Pending);
        RedemptionRepository::insert(&store, &old).await.unwrap();
        RedemptionRepository::insert(&store, &new).await.unwrap();

        let filter = SourceFilter {
            user_id: Some(user),
            ..Default::default()
        };
        let rows = RedemptionRepository::find(&store, &filter, 10, 0).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![new.id, old.id]);
        assert_eq!(RedemptionRepository::count(&store, &filter).await.unwrap(), 2);
    }
}
