//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes of the `/api/cc` admin API and their OpenAPI
//! schemas. Domain objects are reused from [`crate::model`] as-is.
use crate::model::{Namespace, NamespaceChange, ProxyNode, SqlClass, SqlSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub storage: String,
    pub durable: bool,
}

/// `?names=a,b` filter; absent or empty means every namespace.
#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct NamespaceListQuery {
    pub names: Option<String>,
}

impl NamespaceListQuery {
    pub fn names(&self) -> Vec<String> {
        self.names
            .as_deref()
            .filter(|names| !names.trim().is_empty())
            .map(|names| names.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
pub struct NamespaceQueryRequest {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NamespaceListResponse {
    pub items: Vec<Namespace>,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct ModifyNamespaceQuery {
    /// Revision the caller last read; `0` requires the namespace to be new.
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ModifyNamespaceResponse {
    pub name: String,
    pub revision: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NamespaceSnapshotResponse {
    pub items: Vec<Namespace>,
    pub next_seq: u64,
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct ChangesQuery {
    /// Last sequence the caller has applied.
    #[serde(default)]
    pub since: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NamespaceChangesResponse {
    pub items: Vec<NamespaceChange>,
    pub next_seq: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SqlFingerprintResponse {
    pub slow_sqls: BTreeMap<String, SqlSample>,
    pub err_sqls: BTreeMap<String, SqlSample>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RecordSqlRequest {
    pub sql: String,
    pub class: SqlClass,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordSqlResponse {
    /// Normalized statement key; empty when the statement was blank.
    pub fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RegisterProxyRequest {
    /// Proxy admin address, `host:port`.
    pub addr: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProxyNodeListResponse {
    pub items: Vec<ProxyNode>,
}
