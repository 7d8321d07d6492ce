use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::Requester;
use crate::services::redemption::SubmitRedemption;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRedemption {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRedemption {
    #[serde(alias = "error_message")]
    pub error_message: String,
}

pub async fn submit_redemption(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(input): Json<SubmitRedemption>,
) -> Result<impl IntoResponse, AppError> {
    let redemption = state.redemptions.submit(user_id, input).await?;
    Ok((StatusCode::CREATED, Json(redemption)))
}

pub async fn list_redemptions(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .redemptions
        .list_for_user(user_id, params.page, params.limit)
        .await?;
    Ok(Json(page))
}

pub async fn get_redemption(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let redemption = state.redemptions.get(id, user_id).await?;
    Ok(Json(redemption))
}

/// The body is optional; an absent reason falls back to the default.
pub async fn cancel_redemption(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRedemption>>,
) -> Result<impl IntoResponse, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let redemption = state.redemptions.cancel(id, user_id, reason).await?;
    Ok(Json(redemption))
}

pub async fn approve_redemption(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.redemptions.approve(id).await?))
}

pub async fn complete_redemption(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.redemptions.complete(id).await?))
}

pub async fn fail_redemption(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FailRedemption>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.redemptions.fail(id, body.error_message).await?))
}

pub async fn retry_notifications(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.redemptions.redeliver_notifications(id).await?))
}
