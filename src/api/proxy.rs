//! Proxy fleet handlers.
//!
//! # Purpose
//! Registers and removes proxy nodes, exposes the registry, and runs a
//! verification pass on demand.
//!
//! # Key invariants and assumptions
//! - The fingerprint endpoint answers within the verification deadline even
//!   when nodes hang; unreachable nodes are reported per node, not as an error.
use crate::api::error::ApiError;
use crate::api::types::{ProxyNodeListResponse, RegisterProxyRequest};
use crate::app::AppState;
use crate::fleet::FleetReport;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;

#[utoipa::path(
    get,
    path = "/api/cc/proxy/config/fingerprint",
    tag = "proxy",
    responses(
        (status = 200, description = "Expected fingerprint and per-node sync state", body = FleetReport)
    )
)]
pub(crate) async fn fleet_fingerprints(
    State(state): State<AppState>,
) -> Result<Json<FleetReport>, ApiError> {
    Ok(Json(state.verifier.report().await?))
}

#[utoipa::path(
    put,
    path = "/api/cc/proxy/register",
    tag = "proxy",
    request_body = RegisterProxyRequest,
    responses(
        (status = 204, description = "Proxy registered"),
        (status = 400, description = "Invalid address", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn register_proxy(
    State(state): State<AppState>,
    body: Result<Json<RegisterProxyRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    state.fleet.register(&body.addr).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/cc/proxy/{addr}",
    tag = "proxy",
    params(
        ("addr" = String, Path, description = "Proxy address, host:port")
    ),
    responses(
        (status = 204, description = "Proxy deregistered"),
        (status = 404, description = "Proxy not registered", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn deregister_proxy(
    Path(addr): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.fleet.deregister(&addr).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/cc/proxy/nodes",
    tag = "proxy",
    responses(
        (status = 200, description = "Registered proxies and their last poll", body = ProxyNodeListResponse)
    )
)]
pub(crate) async fn list_proxies(
    State(state): State<AppState>,
) -> Result<Json<ProxyNodeListResponse>, ApiError> {
    let items = state.fleet.nodes().await?;
    Ok(Json(ProxyNodeListResponse { items }))
}
