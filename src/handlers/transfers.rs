use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::error::AppError;
use crate::middleware::auth::Requester;
use crate::services::purchase::{RecordGift, RecordPurchase};
use crate::AppState;

pub async fn record_purchase(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(input): Json<RecordPurchase>,
) -> Result<impl IntoResponse, AppError> {
    let purchase = state.transfers.record_purchase(user_id, input).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

/// The requester is the sender.
pub async fn record_gift(
    State(state): State<AppState>,
    Requester(sender_id): Requester,
    Json(input): Json<RecordGift>,
) -> Result<impl IntoResponse, AppError> {
    let gift = state.transfers.record_gift(sender_id, input).await?;
    Ok((StatusCode::CREATED, Json(gift)))
}
