//! Backing-store abstraction for control-plane state.
//!
//! # Purpose
//! Defines the CRUD + snapshot/changes contract, with optimistic concurrency on
//! namespace revisions, that every storage backend implements. Services above
//! this layer own validation; stores own atomicity.
//!
//! # Key invariants
//! - Writes to one namespace name are serialized; writes to different names do
//!   not share a lock.
//! - Deleting a namespace removes its SQL fingerprint entries.
//! - Proxy node rows are keyed by address and only touched by that node's
//!   poll results or explicit registration.
use crate::model::{
    Namespace, NamespaceChange, PollOutcome, ProxyNode, SqlClass, SqlFingerprintSnapshot,
    SqlRecordLimits,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub changes_limit: u64,
    pub change_retention_max_rows: Option<i64>,
}

impl StoreConfig {
    pub fn change_window(&self) -> usize {
        self.change_retention_max_rows
            .unwrap_or(self.changes_limit as i64)
            .max(self.changes_limit as i64) as usize
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct ChangeSet<T> {
    pub items: Vec<T>,
    pub next_seq: u64,
}

impl ChangeSet<NamespaceChange> {
    /// Page of changes read from a log whose next sequence was `head` before
    /// the page was read. A non-empty page resumes right after its last item,
    /// so callers never skip a change.
    pub(crate) fn page(items: Vec<NamespaceChange>, head: u64) -> Self {
        let next_seq = items.last().map_or(head, |last| last.seq + 1);
        Self { items, next_seq }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Namespaces named in `names`, or all of them when `names` is empty.
    /// Unknown names are skipped. Results are ordered by name.
    async fn list_namespaces(&self, names: &[String]) -> StoreResult<Vec<Namespace>>;
    /// Create or replace `namespace` and return its new revision.
    ///
    /// With `expected_revision = Some(r)` the write only applies when the stored
    /// revision is `r` (`0` meaning "must not exist yet"); otherwise `Conflict`.
    async fn upsert_namespace(
        &self,
        namespace: Namespace,
        expected_revision: Option<u64>,
    ) -> StoreResult<u64>;
    async fn delete_namespace(&self, name: &str) -> StoreResult<()>;
    async fn namespace_revision(&self, name: &str) -> StoreResult<Option<u64>>;
    async fn namespace_snapshot(&self) -> StoreResult<Snapshot<Namespace>>;
    async fn namespace_changes(&self, since: u64) -> StoreResult<ChangeSet<NamespaceChange>>;

    /// Create or bump the `(namespace, class, fingerprint)` bucket and return its count.
    async fn record_sql(
        &self,
        namespace: &str,
        class: SqlClass,
        fingerprint: &str,
        sample: &str,
        at: DateTime<Utc>,
        limits: SqlRecordLimits,
    ) -> StoreResult<u64>;
    async fn sql_fingerprints(&self, namespace: &str) -> StoreResult<SqlFingerprintSnapshot>;

    /// Returns `true` when the address was not known before.
    async fn register_proxy(&self, addr: &str) -> StoreResult<bool>;
    async fn deregister_proxy(&self, addr: &str) -> StoreResult<()>;
    async fn record_proxy_poll(&self, addr: &str, outcome: PollOutcome) -> StoreResult<()>;
    async fn proxy(&self, addr: &str) -> StoreResult<Option<ProxyNode>>;
    async fn list_proxies(&self) -> StoreResult<Vec<ProxyNode>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
