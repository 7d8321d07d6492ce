use axum::{
    body::StreamBody,
    extract::{Query, State},
    http::{header, HeaderValue},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::TransactionKind;
use crate::error::AppError;
use crate::middleware::auth::Requester;
use crate::services::export::ExportFormat;
use crate::services::ledger::{HistoryQuery, LedgerFilter};
use crate::AppState;

/// Query parameters shared by the history, admin history and export endpoints.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    /// `purchase`, `redemption` or `gift`
    #[serde(rename = "type", alias = "kind")]
    pub kind: Option<String>,
    pub status: Option<String>,
    /// YYYY-MM-DD or RFC 3339, inclusive
    #[serde(alias = "from")]
    pub date_from: Option<String>,
    /// YYYY-MM-DD (whole day) or RFC 3339, inclusive
    #[serde(alias = "to")]
    pub date_to: Option<String>,
    /// Admin only: narrows the platform-wide view to one user.
    pub user_id: Option<Uuid>,
    pub format: Option<String>,
}

impl HistoryParams {
    /// Validated ledger filter; `user_id` comes from the caller, never from the query.
    pub fn into_filter(self, user_id: Option<Uuid>) -> Result<LedgerFilter, AppError> {
        let kind = self
            .kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(TransactionKind::from_str)
            .transpose()
            .map_err(AppError::InvalidArgument)?;
        let date_from = self
            .date_from
            .as_deref()
            .map(|d| parse_date(d, false))
            .transpose()?;
        let date_to = self
            .date_to
            .as_deref()
            .map(|d| parse_date(d, true))
            .transpose()?;

        let filter = LedgerFilter {
            user_id,
            search: self.search,
            kind,
            status: self
                .status
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            date_from,
            date_to,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// Parse date string to DateTime<Utc>
///
/// Handles both YYYY-MM-DD and RFC 3339. A bare date used as an upper bound covers the
/// whole day.
fn parse_date(date_str: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let date_str = date_str.trim();
    if date_str.len() == 10 {
        let start = DateTime::parse_from_rfc3339(&format!("{}T00:00:00Z", date_str))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::InvalidArgument(format!("Invalid date '{}': {}", date_str, e)))?;
        return Ok(if end_of_day {
            start + chrono::Duration::days(1) - chrono::Duration::microseconds(1)
        } else {
            start
        });
    }

    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::InvalidArgument(format!("Invalid date '{}': {}", date_str, e)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit) = (params.page, params.limit);
    let query = HistoryQuery {
        filter: params.into_filter(Some(user_id))?,
        page,
        limit,
    };
    Ok(Json(state.ledger.query(&query).await?))
}

/// Platform-wide history. Without `userId` the result is capped to the most recent records.
pub async fn list_all_transactions(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, user_id) = (params.page, params.limit, params.user_id);
    let query = HistoryQuery {
        filter: params.into_filter(user_id)?,
        page,
        limit,
    };
    Ok(Json(state.ledger.query(&query).await?))
}

/// Streams the requester's full filtered history as CSV or JSON Lines.
pub async fn export_transactions(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let format = params
        .format
        .as_deref()
        .map(ExportFormat::from_str)
        .transpose()?
        .unwrap_or_default();
    let filter = params.into_filter(Some(user_id))?;
    let stream = state.export.export(&filter, format).await?;

    let filename = format!(
        "transactions_{}.{}",
        Utc::now().format("%Y-%m-%d"),
        format.extension()
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        StreamBody::new(stream),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let start = parse_date("2025-01-01", false).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-01-01T00:00:00+00:00");

        let end = parse_date("2025-01-01", true).unwrap();
        assert!(end > start);
        assert!(end < parse_date("2025-01-02", false).unwrap());

        let exact = parse_date("2025-01-01T12:30:00Z", true).unwrap();
        assert_eq!(exact.to_rfc3339(), "2025-01-01T12:30:00+00:00");

        assert!(matches!(
            parse_date("01/02/2025", false),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn params_become_filter() {
        let user = Uuid::new_v4();
        let params = HistoryParams {
            kind: Some("Gift".to_string()),
            status: Some(" Sent ".to_string()),
            date_from: Some("2025-01-01".to_string()),
            date_to: Some("2025-01-31".to_string()),
            ..Default::default()
        };

        let filter = params.into_filter(Some(user)).unwrap();
        assert_eq!(filter.user_id, Some(user));
        assert_eq!(filter.kind, Some(TransactionKind::Gift));
        assert_eq!(filter.status.as_deref(), Some("sent"));
        assert!(filter.date_from.unwrap() < filter.date_to.unwrap());
    }

    #[test]
    fn unknown_kind_and_inverted_dates_are_rejected() {
        let unknown = HistoryParams {
            kind: Some("airdrop".to_string()),
            ..Default::default()
        };
        assert!(matches!(unknown.into_filter(None), Err(AppError::InvalidArgument(_))));

        let inverted = HistoryParams {
            date_from: Some("2025-02-01".to_string()),
            date_to: Some("2025-01-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(inverted.into_filter(None), Err(AppError::InvalidArgument(_))));
    }
}
