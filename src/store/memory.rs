//! In-memory implementation of the control-plane store.
//!
//! # Purpose
//! Implements `ControlPlaneStore` with `DashMap`s so that every key gets its
//! own shard-level lock. It exists for:
//! - local development and tests (no external dependencies)
//! - single-instance deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Per-key linearizability**: upserts and deletes of one namespace run
//!   under that key's entry guard, and the change-log append happens inside
//!   the same guard, so the feed order for a name matches commit order.
//! - **No global write lock**: writes to different names only contend when
//!   they hash to the same shard.
//!
//! # Lock ordering
//! Namespace entry guard first, then SQL stats entry guard. No guard is ever
//! held across an `.await`, and no code path holds a map guard while calling
//! whole-map operations (`len`, `iter`) on the same map.
use super::{ChangeSet, ControlPlaneStore, Snapshot, StoreConfig, StoreError, StoreResult};
use crate::model::{
    Namespace, NamespaceChange, NamespaceChangeOp, NodeStatus, PollOutcome, ProxyNode, SqlClass,
    SqlFingerprintSnapshot, SqlRecordLimits, SqlSample, truncate_sample,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded, in-memory append-only log of namespace changes.
///
/// - `record()` assigns the next sequence number, appends the change, and
///   evicts older items when the configured capacity is exceeded.
/// - A consumer that falls behind the window must re-bootstrap from
///   `namespace_snapshot()`.
#[derive(Debug)]
struct ChangeLog<T> {
    next_seq: u64,
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> ChangeLog<T> {
    fn new(capacity: usize) -> Self {
        Self {
            next_seq: 0,
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    fn record(&mut self, item: impl FnOnce(u64) -> T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(item(seq));
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        seq
    }
}

#[derive(Debug, Clone)]
struct StoredNamespace {
    namespace: Namespace,
    revision: u64,
}

/// In-memory control-plane store.
pub struct InMemoryStore {
    config: StoreConfig,
    /// Authoritative namespaces keyed by name.
    namespaces: DashMap<String, StoredNamespace>,
    /// Appended while the namespace entry guard is held.
    namespace_changes: Mutex<ChangeLog<NamespaceChange>>,
    /// SQL fingerprint buckets keyed by namespace name.
    sql_stats: DashMap<String, SqlFingerprintSnapshot>,
    /// Fleet registry rows keyed by `host:port`.
    proxies: DashMap<String, ProxyNode>,
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        let capacity = config.change_window();
        Self {
            config,
            namespaces: DashMap::new(),
            namespace_changes: Mutex::new(ChangeLog::new(capacity)),
            sql_stats: DashMap::new(),
            proxies: DashMap::new(),
        }
    }

    fn limit(&self) -> usize {
        self.config.changes_limit as usize
    }

    fn publish_namespace_count(&self) {
        metrics::gauge!("cc_namespaces_total").set(self.namespaces.len() as f64);
    }
}

#[async_trait]
impl ControlPlaneStore for InMemoryStore {
    async fn list_namespaces(&self, names: &[String]) -> StoreResult<Vec<Namespace>> {
        let mut items: Vec<Namespace> = if names.is_empty() {
            self.namespaces
                .iter()
                .map(|entry| entry.value().namespace.clone())
                .collect()
        } else {
            names
                .iter()
                .filter_map(|name| self.namespaces.get(name).map(|e| e.namespace.clone()))
                .collect()
        };
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items.dedup_by(|a, b| a.name == b.name);
        Ok(items)
    }

    async fn upsert_namespace(
        &self,
        namespace: Namespace,
        expected_revision: Option<u64>,
    ) -> StoreResult<u64> {
        let name = namespace.name.clone();
        let revision = match self.namespaces.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().revision;
                if let Some(expected) = expected_revision {
                    if expected != current {
                        return Err(StoreError::Conflict(format!(
                            "namespace {name} is at revision {current}, expected {expected}"
                        )));
                    }
                }
                let revision = current + 1;
                self.namespace_changes.lock().record(|seq| NamespaceChange {
                    seq,
                    op: NamespaceChangeOp::Updated,
                    name: name.clone(),
                    revision,
                    namespace: Some(namespace.clone()),
                });
                entry.insert(StoredNamespace {
                    namespace,
                    revision,
                });
                revision
            }
            Entry::Vacant(entry) => {
                if let Some(expected) = expected_revision.filter(|&r| r != 0) {
                    return Err(StoreError::Conflict(format!(
                        "namespace {name} does not exist, expected revision {expected}"
                    )));
                }
                self.namespace_changes.lock().record(|seq| NamespaceChange {
                    seq,
                    op: NamespaceChangeOp::Created,
                    name: name.clone(),
                    revision: 1,
                    namespace: Some(namespace.clone()),
                });
                entry.insert(StoredNamespace {
                    namespace,
                    revision: 1,
                });
                1
            }
        };
        self.publish_namespace_count();
        Ok(revision)
    }

    async fn delete_namespace(&self, name: &str) -> StoreResult<()> {
        match self.namespaces.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let revision = entry.get().revision;
                self.namespace_changes.lock().record(|seq| NamespaceChange {
                    seq,
                    op: NamespaceChangeOp::Deleted,
                    name: name.to_string(),
                    revision,
                    namespace: None,
                });
                // Cascade while the namespace guard is still held so a concurrent
                // `record_sql` cannot repopulate buckets for the deleted name.
                self.sql_stats.remove(name);
                entry.remove();
            }
            Entry::Vacant(_) => return Err(StoreError::NotFound(format!("namespace {name}"))),
        }
        self.publish_namespace_count();
        Ok(())
    }

    async fn namespace_revision(&self, name: &str) -> StoreResult<Option<u64>> {
        Ok(self.namespaces.get(name).map(|entry| entry.revision))
    }

    async fn namespace_snapshot(&self) -> StoreResult<Snapshot<Namespace>> {
        // Read the checkpoint first: anything committed after it is replayed by
        // the changes feed, and applying a change twice is harmless.
        let next_seq = self.namespace_changes.lock().next_seq;
        let items = self.list_namespaces(&[]).await?;
        Ok(Snapshot { items, next_seq })
    }

    async fn namespace_changes(&self, since: u64) -> StoreResult<ChangeSet<NamespaceChange>> {
        let guard = self.namespace_changes.lock();
        let items = guard
            .items
            .iter()
            .filter(|item| item.seq >= since)
            .take(self.limit())
            .cloned()
            .collect();
        Ok(ChangeSet::page(items, guard.next_seq))
    }

    async fn record_sql(
        &self,
        namespace: &str,
        class: SqlClass,
        fingerprint: &str,
        sample: &str,
        at: DateTime<Utc>,
        limits: SqlRecordLimits,
    ) -> StoreResult<u64> {
        let Some(_namespace_guard) = self.namespaces.get(namespace) else {
            return Err(StoreError::NotFound(format!("namespace {namespace}")));
        };
        let mut buckets = self.sql_stats.entry(namespace.to_string()).or_default();
        let bucket = buckets.class_mut(class);
        let sample = truncate_sample(sample, limits.max_sample_len);
        if let Some(entry) = bucket.get_mut(fingerprint) {
            entry.count += 1;
            entry.sample = sample;
            entry.last_seen = at;
            return Ok(entry.count);
        }
        if limits.max_entries > 0 && bucket.len() >= limits.max_entries {
            let oldest = bucket
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                bucket.remove(&oldest);
            }
        }
        bucket.insert(
            fingerprint.to_string(),
            SqlSample {
                sample,
                count: 1,
                first_seen: at,
                last_seen: at,
            },
        );
        Ok(1)
    }

    async fn sql_fingerprints(&self, namespace: &str) -> StoreResult<SqlFingerprintSnapshot> {
        if !self.namespaces.contains_key(namespace) {
            return Err(StoreError::NotFound(format!("namespace {namespace}")));
        }
        Ok(self
            .sql_stats
            .get(namespace)
            .map(|buckets| buckets.clone())
            .unwrap_or_default())
    }

    async fn register_proxy(&self, addr: &str) -> StoreResult<bool> {
        match self.proxies.entry(addr.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(ProxyNode {
                    addr: addr.to_string(),
                    fingerprint: None,
                    status: NodeStatus::Unknown,
                    last_seen: None,
                    last_error: None,
                });
                Ok(true)
            }
        }
    }

    async fn deregister_proxy(&self, addr: &str) -> StoreResult<()> {
        match self.proxies.remove(addr) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("proxy {addr}"))),
        }
    }

    async fn record_proxy_poll(&self, addr: &str, outcome: PollOutcome) -> StoreResult<()> {
        let Some(mut node) = self.proxies.get_mut(addr) else {
            return Err(StoreError::NotFound(format!("proxy {addr}")));
        };
        match outcome {
            PollOutcome::Observed { fingerprint, at } => {
                node.fingerprint = Some(fingerprint);
                node.status = NodeStatus::Reachable;
                node.last_seen = Some(at);
                node.last_error = None;
            }
            PollOutcome::Failed { reason } => {
                node.status = NodeStatus::Unreachable;
                node.last_error = Some(reason);
            }
        }
        Ok(())
    }

    async fn proxy(&self, addr: &str) -> StoreResult<Option<ProxyNode>> {
        Ok(self.proxies.get(addr).map(|node| node.value().clone()))
    }

    async fn list_proxies(&self) -> StoreResult<Vec<ProxyNode>> {
        let mut nodes: Vec<ProxyNode> = self
            .proxies
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.addr.cmp(&b.addr));
        Ok(nodes)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
