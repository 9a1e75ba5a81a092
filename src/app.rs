//! Control-plane HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::fleet::{ConfigFingerprintVerifier, FleetRegistry, NodeClient};
use crate::model::SqlRecordLimits;
use crate::observability;
use crate::service::{NamespaceStore, SqlStatsAggregator};
use crate::store::ControlPlaneStore;
use axum::Router;
use axum::routing::{delete, get, post, put};
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ControlPlaneStore>,
    pub namespaces: NamespaceStore,
    pub sql_stats: SqlStatsAggregator,
    pub fleet: FleetRegistry,
    pub verifier: ConfigFingerprintVerifier,
}

/// Timeouts and bounds the components are built with.
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    pub sql: SqlRecordLimits,
    pub poll_timeout: Duration,
    pub verify_deadline: Duration,
}

impl AppState {
    /// Wire every component over one shared store.
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        client: Arc<dyn NodeClient>,
        limits: StateLimits,
    ) -> Self {
        let namespaces = NamespaceStore::new(store.clone());
        let sql_stats = SqlStatsAggregator::new(store.clone(), limits.sql);
        let fleet = FleetRegistry::new(store.clone(), client, limits.poll_timeout);
        let verifier =
            ConfigFingerprintVerifier::new(namespaces.clone(), fleet.clone(), limits.verify_deadline);
        Self {
            store,
            namespaces,
            sql_stats,
            fleet,
            verifier,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    let cc = Router::new()
        .route("/system/health", get(api::system::system_health))
        .route("/openapi.json", get(openapi_json))
        .route("/namespace", get(api::namespaces::list_namespaces))
        .route("/namespace/query", post(api::namespaces::query_namespaces))
        .route("/namespace/modify", put(api::namespaces::modify_namespace))
        .route(
            "/namespace/delete/:name",
            put(api::namespaces::delete_namespace),
        )
        .route(
            "/namespace/snapshot",
            get(api::namespaces::namespace_snapshot),
        )
        .route(
            "/namespace/changes",
            get(api::namespaces::namespace_changes),
        )
        .route(
            "/namespace/sqlfingerprint/:name",
            get(api::sql::query_sql_fingerprints).post(api::sql::record_sql),
        )
        .route(
            "/namespace/:name",
            delete(api::namespaces::delete_namespace),
        )
        .route(
            "/proxy/config/fingerprint",
            get(api::proxy::fleet_fingerprints),
        )
        .route("/proxy/register", put(api::proxy::register_proxy))
        .route("/proxy/nodes", get(api::proxy::list_proxies))
        .route("/proxy/:addr", delete(api::proxy::deregister_proxy))
        .layer(CompressionLayer::new());

    Router::new()
        .nest("/api/cc", cc)
        .layer(trace_layer)
        .with_state(state)
}

async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}
