//! Namespace API handlers.
//!
//! # Purpose
//! Query, modify, and delete namespaces, plus the snapshot and change-feed
//! endpoints proxies use to follow configuration.
use crate::api::error::ApiError;
use crate::api::types::{
    ChangesQuery, ModifyNamespaceQuery, ModifyNamespaceResponse, NamespaceChangesResponse,
    NamespaceListQuery, NamespaceListResponse, NamespaceQueryRequest, NamespaceSnapshotResponse,
};
use crate::app::AppState;
use crate::model::Namespace;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

#[utoipa::path(
    get,
    path = "/api/cc/namespace",
    tag = "namespaces",
    params(NamespaceListQuery),
    responses(
        (status = 200, description = "Matching namespaces", body = NamespaceListResponse)
    )
)]
pub(crate) async fn list_namespaces(
    State(state): State<AppState>,
    query: Result<Query<NamespaceListQuery>, QueryRejection>,
) -> Result<Json<NamespaceListResponse>, ApiError> {
    let Query(query) = query?;
    let items = state.namespaces.list(&query.names()).await?;
    Ok(Json(NamespaceListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/api/cc/namespace/query",
    tag = "namespaces",
    request_body = NamespaceQueryRequest,
    responses(
        (status = 200, description = "Matching namespaces", body = NamespaceListResponse),
        (status = 400, description = "Malformed body", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn query_namespaces(
    State(state): State<AppState>,
    body: Result<Json<NamespaceQueryRequest>, JsonRejection>,
) -> Result<Json<NamespaceListResponse>, ApiError> {
    let Json(body) = body?;
    let items = state.namespaces.list(&body.names).await?;
    Ok(Json(NamespaceListResponse { items }))
}

#[utoipa::path(
    put,
    path = "/api/cc/namespace/modify",
    tag = "namespaces",
    params(ModifyNamespaceQuery),
    request_body = Namespace,
    responses(
        (status = 200, description = "Namespace stored", body = ModifyNamespaceResponse),
        (status = 400, description = "Invalid namespace", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Revision mismatch", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn modify_namespace(
    State(state): State<AppState>,
    query: Result<Query<ModifyNamespaceQuery>, QueryRejection>,
    body: Result<Json<Namespace>, JsonRejection>,
) -> Result<Json<ModifyNamespaceResponse>, ApiError> {
    let Query(query) = query?;
    let Json(namespace) = body?;
    let name = namespace.name.clone();
    let revision = match query.expected_revision {
        Some(expected) => {
            state
                .namespaces
                .upsert_with_revision(namespace, expected)
                .await?
        }
        None => state.namespaces.upsert(namespace).await?,
    };
    Ok(Json(ModifyNamespaceResponse { name, revision }))
}

#[utoipa::path(
    delete,
    path = "/api/cc/namespace/{name}",
    tag = "namespaces",
    params(
        ("name" = String, Path, description = "Namespace name")
    ),
    responses(
        (status = 204, description = "Namespace deleted"),
        (status = 404, description = "Namespace not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_namespace(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.namespaces.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/cc/namespace/snapshot",
    tag = "namespaces",
    responses(
        (status = 200, description = "Full namespace snapshot", body = NamespaceSnapshotResponse)
    )
)]
pub(crate) async fn namespace_snapshot(
    State(state): State<AppState>,
) -> Result<Json<NamespaceSnapshotResponse>, ApiError> {
    let snapshot = state.namespaces.snapshot().await?;
    Ok(Json(NamespaceSnapshotResponse {
        items: snapshot.items,
        next_seq: snapshot.next_seq,
    }))
}

#[utoipa::path(
    get,
    path = "/api/cc/namespace/changes",
    tag = "namespaces",
    params(ChangesQuery),
    responses(
        (status = 200, description = "Namespace change list", body = NamespaceChangesResponse)
    )
)]
pub(crate) async fn namespace_changes(
    State(state): State<AppState>,
    query: Result<Query<ChangesQuery>, QueryRejection>,
) -> Result<Json<NamespaceChangesResponse>, ApiError> {
    let Query(query) = query?;
    let changes = state.namespaces.changes(query.since).await?;
    Ok(Json(NamespaceChangesResponse {
        items: changes.items,
        next_seq: changes.next_seq,
    }))
}
