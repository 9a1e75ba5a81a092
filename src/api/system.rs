//! System/health API handlers.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/api/cc/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Control plane health", body = HealthStatus),
        (status = 500, description = "Storage unavailable", body = crate::api::types::ErrorResponse)
    )
)]
/// Probe the backing store and report `ok` if it answers.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        storage: state.store.backend_name().to_string(),
        durable: state.store.is_durable(),
    }))
}
