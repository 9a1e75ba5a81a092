//! OpenAPI schema aggregation for the admin API.
//!
//! # Purpose
//! Collects every route and schema type into the document served at
//! `/api/cc/openapi.json`.
use crate::api::{
    namespaces, proxy, sql, system,
    types::{
        ErrorResponse, HealthStatus, ModifyNamespaceResponse, NamespaceChangesResponse,
        NamespaceListResponse, NamespaceQueryRequest, NamespaceSnapshotResponse,
        ProxyNodeListResponse, RecordSqlRequest, RecordSqlResponse, RegisterProxyRequest,
        SqlFingerprintResponse,
    },
};
use crate::fleet::{FleetReport, NodeReport, SyncState};
use crate::model::{
    Namespace, NamespaceChange, NamespaceChangeOp, NodeStatus, ProxyNode, RwFlag, ShardKind,
    ShardRule, Slice, SqlClass, SqlSample, User,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxy-cc",
        version = "v1",
        description = "DB proxy fleet control plane admin API"
    ),
    paths(
        system::system_health,
        namespaces::list_namespaces,
        namespaces::query_namespaces,
        namespaces::modify_namespace,
        namespaces::delete_namespace,
        namespaces::namespace_snapshot,
        namespaces::namespace_changes,
        sql::query_sql_fingerprints,
        sql::record_sql,
        proxy::fleet_fingerprints,
        proxy::register_proxy,
        proxy::deregister_proxy,
        proxy::list_proxies
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        Namespace,
        Slice,
        ShardRule,
        ShardKind,
        User,
        RwFlag,
        NamespaceChange,
        NamespaceChangeOp,
        NamespaceQueryRequest,
        NamespaceListResponse,
        ModifyNamespaceResponse,
        NamespaceSnapshotResponse,
        NamespaceChangesResponse,
        SqlClass,
        SqlSample,
        SqlFingerprintResponse,
        RecordSqlRequest,
        RecordSqlResponse,
        ProxyNode,
        NodeStatus,
        RegisterProxyRequest,
        ProxyNodeListResponse,
        FleetReport,
        NodeReport,
        SyncState
    )),
    tags(
        (name = "namespaces", description = "Namespace configuration"),
        (name = "sql", description = "Slow and error SQL fingerprints"),
        (name = "proxy", description = "Proxy fleet registry and verification"),
        (name = "system", description = "Health")
    )
)]
pub struct ApiDoc;
