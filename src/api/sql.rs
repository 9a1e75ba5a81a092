//! Slow/error SQL fingerprint handlers.
use crate::api::error::ApiError;
use crate::api::types::{RecordSqlRequest, RecordSqlResponse, SqlFingerprintResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};

#[utoipa::path(
    get,
    path = "/api/cc/namespace/sqlfingerprint/{name}",
    tag = "sql",
    params(
        ("name" = String, Path, description = "Namespace name")
    ),
    responses(
        (status = 200, description = "Slow and error SQL buckets", body = SqlFingerprintResponse),
        (status = 404, description = "Namespace not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn query_sql_fingerprints(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SqlFingerprintResponse>, ApiError> {
    let snapshot = state.sql_stats.query(&name).await?;
    Ok(Json(SqlFingerprintResponse {
        slow_sqls: snapshot.slow,
        err_sqls: snapshot.error,
    }))
}

#[utoipa::path(
    post,
    path = "/api/cc/namespace/sqlfingerprint/{name}",
    tag = "sql",
    params(
        ("name" = String, Path, description = "Namespace name")
    ),
    request_body = RecordSqlRequest,
    responses(
        (status = 200, description = "Statement recorded", body = RecordSqlResponse),
        (status = 400, description = "Malformed body", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Namespace not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn record_sql(
    Path(name): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<RecordSqlRequest>, JsonRejection>,
) -> Result<Json<RecordSqlResponse>, ApiError> {
    let Json(body) = body?;
    let fingerprint = state.sql_stats.record(&name, &body.sql, body.class).await?;
    Ok(Json(RecordSqlResponse { fingerprint }))
}
