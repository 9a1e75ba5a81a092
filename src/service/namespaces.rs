//! Validated, versioned namespace storage.
//!
//! # Purpose
//! The single writer of namespace state. Every write is validated in full
//! before it reaches the backing store, so an invalid object never leaves a
//! trace (no row, no revision bump, no change event).
use crate::error::CcResult;
use crate::model::{Namespace, NamespaceChange};
use crate::store::{ChangeSet, ControlPlaneStore, Snapshot};
use std::sync::Arc;

#[derive(Clone)]
pub struct NamespaceStore {
    store: Arc<dyn ControlPlaneStore>,
}

impl NamespaceStore {
    pub fn new(store: Arc<dyn ControlPlaneStore>) -> Self {
        Self { store }
    }

    /// Namespaces named in `names`, or every namespace when `names` is empty.
    ///
    /// Unknown and blank names are dropped rather than reported.
    pub async fn list(&self, names: &[String]) -> CcResult<Vec<Namespace>> {
        let wanted: Vec<String> = names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if !names.is_empty() && wanted.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.list_namespaces(&wanted).await?)
    }

    /// Validate and create or replace `namespace` (last writer wins).
    pub async fn upsert(&self, namespace: Namespace) -> CcResult<u64> {
        self.write(namespace, None).await
    }

    /// Compare-and-set variant of [`upsert`](Self::upsert). `expected_revision`
    /// of `0` means the namespace must not exist yet.
    pub async fn upsert_with_revision(
        &self,
        namespace: Namespace,
        expected_revision: u64,
    ) -> CcResult<u64> {
        self.write(namespace, Some(expected_revision)).await
    }

    async fn write(&self, namespace: Namespace, expected_revision: Option<u64>) -> CcResult<u64> {
        if let Err(err) = namespace.validate() {
            tracing::info!(namespace = %namespace.name, error = %err, "rejected namespace");
            return Err(err.into());
        }
        let name = namespace.name.clone();
        let revision = self
            .store
            .upsert_namespace(namespace, expected_revision)
            .await?;
        metrics::counter!("cc_namespace_upserts_total").increment(1);
        tracing::info!(namespace = %name, revision, "namespace stored");
        Ok(revision)
    }

    /// Remove `name` together with its SQL fingerprint buckets.
    pub async fn delete(&self, name: &str) -> CcResult<()> {
        self.store.delete_namespace(name).await?;
        metrics::counter!("cc_namespace_deletes_total").increment(1);
        tracing::info!(namespace = %name, "namespace deleted");
        Ok(())
    }

    pub async fn snapshot(&self) -> CcResult<Snapshot<Namespace>> {
        Ok(self.store.namespace_snapshot().await?)
    }

    pub async fn changes(&self, since: u64) -> CcResult<ChangeSet<NamespaceChange>> {
        Ok(self.store.namespace_changes(since).await?)
    }
}
