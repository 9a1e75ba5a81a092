//! Per-namespace slow/error SQL aggregation.
//!
//! # Purpose
//! Normalizes each reported statement with [`fingerprint`] and folds it into
//! the `(namespace, class, fingerprint)` bucket held by the backing store.
use crate::error::{CcError, CcResult};
use crate::model::{SqlClass, SqlFingerprintSnapshot, SqlRecordLimits};
use crate::sqlfp::fingerprint;
use crate::store::ControlPlaneStore;
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct SqlStatsAggregator {
    store: Arc<dyn ControlPlaneStore>,
    limits: SqlRecordLimits,
}

impl SqlStatsAggregator {
    pub fn new(store: Arc<dyn ControlPlaneStore>, limits: SqlRecordLimits) -> Self {
        Self { store, limits }
    }

    /// Record one occurrence of `raw_sql` and return its fingerprint.
    ///
    /// Blank statements are not recorded; they still require the namespace to
    /// exist and yield an empty fingerprint.
    pub async fn record(&self, namespace: &str, raw_sql: &str, class: SqlClass) -> CcResult<String> {
        let key = fingerprint(raw_sql);
        if key.is_empty() {
            if self.store.namespace_revision(namespace).await?.is_none() {
                return Err(CcError::NotFound(format!("namespace {namespace}")));
            }
            return Ok(key);
        }
        let count = self
            .store
            .record_sql(namespace, class, &key, raw_sql, Utc::now(), self.limits)
            .await?;
        metrics::counter!("cc_sql_records_total", "class" => class.as_str()).increment(1);
        tracing::debug!(namespace, %class, fingerprint = %key, count, "sql recorded");
        Ok(key)
    }

    pub async fn query(&self, namespace: &str) -> CcResult<SqlFingerprintSnapshot> {
        Ok(self.store.sql_fingerprints(namespace).await?)
    }
}
