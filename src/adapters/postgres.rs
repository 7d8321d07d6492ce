//! Postgres implementation of the Record Store ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    GiftRecord, NotificationEvent, NotificationStatus, PurchaseRecord, RedemptionRequest,
};
use crate::ports::{
    GiftRepository, NotificationFlagStore, PurchaseRepository, RedemptionRepository,
    RepositoryError, RepositoryResult, SourceFilter,
};

const REDEMPTION_COLUMNS: &str = "id, user_id, wallet_address, metal, quantity, grams_amount, \
    token_amount, token_value_usd, platform_fee_usd, delivery_fee, total_cost_usd, \
    delivery_method, network, transaction_hash, status, request_notified, processing_notified, \
    fulfilled_notified, cancelled_notified, failed_notified, cancellation_reason, error_message, \
    approved_at, completed_at, cancelled_at, failed_at, created_at, updated_at, version";

const PURCHASE_COLUMNS: &str = "id, user_id, metal, token_amount, usd_amount, fee_amount, \
    price_per_gram, payment_method, status, wallet_address, transaction_hash, network, created_at";

const GIFT_COLUMNS: &str = "id, sender_id, recipient_id, metal, token_amount, usd_value, \
    sender_wallet, recipient_wallet, message, status, transaction_hash, network, created_at";

/// Postgres-backed store for all three ledger collections.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn redemption_exists(&self, id: Uuid) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM redemptions WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

/// Filter value enum for dynamic parameter handling
#[derive(Debug, Clone, PartialEq)]
enum FilterValue {
    Uuid(Uuid),
    String(String),
    DateTime(DateTime<Utc>),
}

/// Which columns a collection exposes to the common filter.
struct FilterColumns {
    owner: &'static [&'static str],
    search: &'static [&'static str],
}

const REDEMPTION_FILTER: FilterColumns = FilterColumns {
    owner: &["user_id"],
    search: &["id::text", "wallet_address", "transaction_hash"],
};

const PURCHASE_FILTER: FilterColumns = FilterColumns {
    owner: &["user_id"],
    search: &["id::text", "wallet_address", "transaction_hash"],
};

const GIFT_FILTER: FilterColumns = FilterColumns {
    owner: &["sender_id", "recipient_id"],
    search: &["id::text", "sender_wallet", "recipient_wallet", "transaction_hash"],
};

/// Build SQL filter conditions for one collection
fn build_filter_conditions(filter: &SourceFilter, columns: &FilterColumns) -> (String, Vec<FilterValue>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(user_id) = filter.user_id {
        params.push(FilterValue::Uuid(user_id));
        let n = params.len();
        let owner = columns
            .owner
            .iter()
            .map(|col| format!("{} = ${}", col, n))
            .collect::<Vec<_>>()
            .join(" OR ");
        conditions.push(format!("({})", owner));
    }

    if let Some(status) = &filter.status {
        params.push(FilterValue::String(status.clone()));
        conditions.push(format!("status = ${}", params.len()));
    }

    if let Some(from) = filter.date_from {
        params.push(FilterValue::DateTime(from));
        conditions.push(format!("created_at >= ${}", params.len()));
    }

    if let Some(to) = filter.date_to {
        params.push(FilterValue::DateTime(to));
        conditions.push(format!("created_at <= ${}", params.len()));
    }

    if let Some(pattern) = filter.search_pattern() {
        params.push(FilterValue::String(pattern));
        let n = params.len();
        let search = columns
            .search
            .iter()
            .map(|col| format!("{} ILIKE ${}", col, n))
            .collect::<Vec<_>>()
            .join(" OR ");
        conditions.push(format!("({})", search));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, params)
}

fn bind_rows<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    params: &[FilterValue],
) -> QueryAs<'q, Postgres, O, PgArguments> {
    for param in params {
        query = match param {
            FilterValue::Uuid(id) => query.bind(*id),
            FilterValue::String(s) => query.bind(s.clone()),
            FilterValue::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

fn bind_scalar<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    params: &[FilterValue],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for param in params {
        query = match param {
            FilterValue::Uuid(id) => query.bind(*id),
            FilterValue::String(s) => query.bind(s.clone()),
            FilterValue::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

fn page_sql(columns: &str, table: &str, where_clause: &str, param_count: usize) -> String {
    format!(
        "SELECT {} FROM {} {} ORDER BY created_at DESC, id ASC LIMIT ${} OFFSET ${}",
        columns,
        table,
        where_clause,
        param_count + 1,
        param_count + 2
    )
}

async fn count_rows(
    pool: &PgPool,
    table: &str,
    filter: &SourceFilter,
    columns: &FilterColumns,
) -> RepositoryResult<i64> {
    let (where_clause, params) = build_filter_conditions(filter, columns);
    let sql = format!("SELECT COUNT(*) FROM {} {}", table, where_clause);
    let count: i64 = bind_scalar(sqlx::query_scalar(&sql), &params)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> RepositoryResult<T> {
    value.parse().map_err(RepositoryError::Corrupt)
}

#[async_trait]
impl RedemptionRepository for PostgresStore {
    async fn insert(&self, r: &RedemptionRequest) -> RepositoryResult<RedemptionRequest> {
        let sql = format!(
            "INSERT INTO redemptions ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, \
             $27, $28, $29) RETURNING {cols}",
            cols = REDEMPTION_COLUMNS
        );
        let flags = r.notification_status;
        let row = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(r.id)
            .bind(r.user_id)
            .bind(&r.wallet_address)
            .bind(r.metal.as_str())
            .bind(r.quantity)
            .bind(&r.grams_amount)
            .bind(&r.token_amount)
            .bind(&r.token_value_usd)
            .bind(&r.platform_fee_usd)
            .bind(&r.delivery_fee)
            .bind(&r.total_cost_usd)
            .bind(&r.delivery_method)
            .bind(&r.network)
            .bind(&r.transaction_hash)
            .bind(r.status.as_str())
            .bind(flags.request_notified)
            .bind(flags.processing_notified)
            .bind(flags.fulfilled_notified)
            .bind(flags.cancelled_notified)
            .bind(flags.failed_notified)
            .bind(&r.cancellation_reason)
            .bind(&r.error_message)
            .bind(r.approved_at)
            .bind(r.completed_at)
            .bind(r.cancelled_at)
            .bind(r.failed_at)
            .bind(r.created_at)
            .bind(r.updated_at)
            .bind(r.version)
            .fetch_one(&self.pool)
            .await?;

        row.into_domain()
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<RedemptionRequest>> {
        let sql = format!("SELECT {} FROM redemptions WHERE id = $1", REDEMPTION_COLUMNS);
        let row = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RedemptionRow::into_domain).transpose()
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<RedemptionRequest>> {
        let (where_clause, params) = build_filter_conditions(filter, &REDEMPTION_FILTER);
        let sql = page_sql(REDEMPTION_COLUMNS, "redemptions", &where_clause, params.len());
        let rows = bind_rows(sqlx::query_as::<_, RedemptionRow>(&sql), &params)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(RedemptionRow::into_domain).collect()
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        count_rows(&self.pool, "redemptions", filter, &REDEMPTION_FILTER).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &RedemptionRequest,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redemptions
            SET status = $2, cancellation_reason = $3, error_message = $4,
                approved_at = $5, completed_at = $6, cancelled_at = $7, failed_at = $8,
                updated_at = $9, version = $10
            WHERE id = $1 AND version = $11
            "#,
        )
        .bind(next.id)
        .bind(next.status.as_str())
        .bind(&next.cancellation_reason)
        .bind(&next.error_message)
        .bind(next.approved_at)
        .bind(next.completed_at)
        .bind(next.cancelled_at)
        .bind(next.failed_at)
        .bind(next.updated_at)
        .bind(next.version)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.redemption_exists(next.id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("redemption {}", next.id)))
        }
    }
}

#[async_trait]
impl NotificationFlagStore for PostgresStore {
    async fn try_claim(
        &self,
        redemption_id: Uuid,
        event: NotificationEvent,
    ) -> RepositoryResult<bool> {
        let column = event.flag_column();
        let sql = format!(
            "UPDATE redemptions SET {col} = TRUE WHERE id = $1 AND {col} = FALSE",
            col = column
        );
        let result = sqlx::query(&sql).bind(redemption_id).execute(&self.pool).await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.redemption_exists(redemption_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("redemption {}", redemption_id)))
        }
    }

    async fn release(&self, redemption_id: Uuid, event: NotificationEvent) -> RepositoryResult<()> {
        let sql = format!(
            "UPDATE redemptions SET {} = FALSE WHERE id = $1",
            event.flag_column()
        );
        let result = sqlx::query(&sql).bind(redemption_id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("redemption {}", redemption_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PurchaseRepository for PostgresStore {
    async fn insert(&self, p: &PurchaseRecord) -> RepositoryResult<PurchaseRecord> {
        let sql = format!(
            "INSERT INTO purchases ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13) RETURNING {cols}",
            cols = PURCHASE_COLUMNS
        );
        let row = sqlx::query_as::<_, PurchaseRow>(&sql)
            .bind(p.id)
            .bind(p.user_id)
            .bind(p.metal.as_str())
            .bind(&p.token_amount)
            .bind(&p.usd_amount)
            .bind(&p.fee_amount)
            .bind(&p.price_per_gram)
            .bind(&p.payment_method)
            .bind(p.status.as_str())
            .bind(&p.wallet_address)
            .bind(&p.transaction_hash)
            .bind(&p.network)
            .bind(p.created_at)
            .fetch_one(&self.pool)
            .await?;

        row.into_domain()
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<PurchaseRecord>> {
        let (where_clause, params) = build_filter_conditions(filter, &PURCHASE_FILTER);
        let sql = page_sql(PURCHASE_COLUMNS, "purchases", &where_clause, params.len());
        let rows = bind_rows(sqlx::query_as::<_, PurchaseRow>(&sql), &params)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PurchaseRow::into_domain).collect()
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        count_rows(&self.pool, "purchases", filter, &PURCHASE_FILTER).await
    }
}

#[async_trait]
impl GiftRepository for PostgresStore {
    async fn insert(&self, g: &GiftRecord) -> RepositoryResult<GiftRecord> {
        let sql = format!(
            "INSERT INTO gifts ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13) RETURNING {cols}",
            cols = GIFT_COLUMNS
        );
        let row = sqlx::query_as::<_, GiftRow>(&sql)
            .bind(g.id)
            .bind(g.sender_id)
            .bind(g.recipient_id)
            .bind(g.metal.as_str())
            .bind(&g.token_amount)
            .bind(&g.usd_value)
            .bind(&g.sender_wallet)
            .bind(&g.recipient_wallet)
            .bind(&g.message)
            .bind(g.status.as_str())
            .bind(&g.transaction_hash)
            .bind(&g.network)
            .bind(g.created_at)
            .fetch_one(&self.pool)
            .await?;

        row.into_domain()
    }

    async fn find(
        &self,
        filter: &SourceFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<GiftRecord>> {
        let (where_clause, params) = build_filter_conditions(filter, &GIFT_FILTER);
        let sql = page_sql(GIFT_COLUMNS, "gifts", &where_clause, params.len());
        let rows = bind_rows(sqlx::query_as::<_, GiftRow>(&sql), &params)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(GiftRow::into_domain).collect()
    }

    async fn count(&self, filter: &SourceFilter) -> RepositoryResult<i64> {
        count_rows(&self.pool, "gifts", filter, &GIFT_FILTER).await
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct RedemptionRow {
    id: Uuid,
    user_id: Uuid,
    wallet_address: String,
    metal: String,
    quantity: i32,
    grams_amount: BigDecimal,
    token_amount: BigDecimal,
    token_value_usd: BigDecimal,
    platform_fee_usd: BigDecimal,
    delivery_fee: BigDecimal,
    total_cost_usd: BigDecimal,
    delivery_method: String,
    network: String,
    transaction_hash: Option<String>,
    status: String,
    request_notified: bool,
    processing_notified: bool,
    fulfilled_notified: bool,
    cancelled_notified: bool,
    failed_notified: bool,
    cancellation_reason: Option<String>,
    error_message: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl RedemptionRow {
    fn into_domain(self) -> RepositoryResult<RedemptionRequest> {
        Ok(RedemptionRequest {
            id: self.id,
            user_id: self.user_id,
            wallet_address: self.wallet_address,
            metal: parse(&self.metal)?,
            quantity: self.quantity,
            grams_amount: self.grams_amount,
            token_amount: self.token_amount,
            token_value_usd: self.token_value_usd,
            platform_fee_usd: self.platform_fee_usd,
            delivery_fee: self.delivery_fee,
            total_cost_usd: self.total_cost_usd,
            delivery_method: self.delivery_method,
            network: self.network,
            transaction_hash: self.transaction_hash,
            status: parse(&self.status)?,
            notification_status: NotificationStatus {
                request_notified: self.request_notified,
                processing_notified: self.processing_notified,
                fulfilled_notified: self.fulfilled_notified,
                cancelled_notified: self.cancelled_notified,
                failed_notified: self.failed_notified,
            },
            cancellation_reason: self.cancellation_reason,
            error_message: self.error_message,
            approved_at: self.approved_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            failed_at: self.failed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: Uuid,
    user_id: Uuid,
    metal: String,
    token_amount: BigDecimal,
    usd_amount: BigDecimal,
    fee_amount: BigDecimal,
    price_per_gram: BigDecimal,
    payment_method: String,
    status: String,
    wallet_address: String,
    transaction_hash: Option<String>,
    network: String,
    created_at: DateTime<Utc>,
}

impl PurchaseRow {
    fn into_domain(self) -> RepositoryResult<PurchaseRecord> {
        Ok(PurchaseRecord {
            id: self.id,
            user_id: self.user_id,
            metal: parse(&self.metal)?,
            token_amount: self.token_amount,
            usd_amount: self.usd_amount,
            fee_amount: self.fee_amount,
            price_per_gram: self.price_per_gram,
            payment_method: self.payment_method,
            status: parse(&self.status)?,
            wallet_address: self.wallet_address,
            transaction_hash: self.transaction_hash,
            network: self.network,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GiftRow {
    id: Uuid,
    sender_id: Uuid,
    recipient_id: Option<Uuid>,
    metal: String,
    token_amount: BigDecimal,
    usd_value: BigDecimal,
    sender_wallet: String,
    recipient_wallet: String,
    message: Option<String>,
    status: String,
    transaction_hash: Option<String>,
    network: String,
    created_at: DateTime<Utc>,
}

impl GiftRow {
    fn into_domain(self) -> RepositoryResult<GiftRecord> {
        Ok(GiftRecord {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            metal: parse(&self.metal)?,
            token_amount: self.token_amount,
            usd_value: self.usd_value,
            sender_wallet: self.sender_wallet,
            recipient_wallet: self.recipient_wallet,
            message: self.message,
            status: parse(&self.status)?,
            transaction_hash: self.transaction_hash,
            network: self.network,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_conditions_no_filters() {
        let (where_clause, params) =
            build_filter_conditions(&SourceFilter::default(), &PURCHASE_FILTER);
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_gift_owner_matches_either_side() {
        let filter = SourceFilter {
            user_id: Some(Uuid::nil()),
            ..Default::default()
        };
        let (where_clause, params) = build_filter_conditions(&filter, &GIFT_FILTER);
        assert_eq!(where_clause, "WHERE (sender_id = $1 OR recipient_id = $1)");
        assert_eq!(params, vec![FilterValue::Uuid(Uuid::nil())]);
    }

    #[test]
    fn test_build_filter_conditions_numbers_params_in_order() {
        let filter = SourceFilter {
            user_id: Some(Uuid::nil()),
            status: Some("completed".to_string()),
            date_from: Some(Utc::now()),
            date_to: Some(Utc::now()),
            search: Some("0xab".to_string()),
        };
        let (where_clause, params) = build_filter_conditions(&filter, &REDEMPTION_FILTER);
        assert!(where_clause.contains("status = $2"));
        assert!(where_clause.contains("created_at >= $3"));
        assert!(where_clause.contains("created_at <= $4"));
        assert!(where_clause.contains("wallet_address ILIKE $5"));
        assert_eq!(params.len(), 5);

        let sql = page_sql(REDEMPTION_COLUMNS, "redemptions", &where_clause, params.len());
        assert!(sql.ends_with("ORDER BY created_at DESC, id ASC LIMIT $6 OFFSET $7"));
    }
}
