pub mod redemptions;
pub mod transactions;
pub mod transfers;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.check_health().await;

    // Degraded still serves traffic
    let status_code = if health.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health))
}
