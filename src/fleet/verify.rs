//! Fleet configuration consistency check.
//!
//! # Purpose
//! Computes the fingerprint of the authoritative namespace configuration and
//! compares it with what every registered proxy reports.
//!
//! # Key invariants
//! - One verification pass polls all nodes concurrently and finishes by the
//!   global deadline, however many nodes hang.
//! - Node failures are per-node results. A pass only fails when the store
//!   itself cannot be read.
//! - Every registered node appears exactly once in the result.
use super::registry::FleetRegistry;
use crate::error::{CcError, CcResult};
use crate::model::{Namespace, NodeFingerprint};
use crate::service::NamespaceStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use utoipa::ToSchema;

const DEADLINE_EXCEEDED: &str = "verification deadline exceeded";

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    InSync,
    Drifted,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// Fingerprint the node reported during this pass, if it answered.
    pub observed: Option<String>,
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct FleetReport {
    pub expected: String,
    pub nodes: BTreeMap<String, NodeReport>,
}

/// SHA-256 over the RFC 8785 canonical JSON of `name -> namespace`.
pub fn config_fingerprint(namespaces: &[Namespace]) -> Result<String, serde_json::Error> {
    let by_name: BTreeMap<&str, &Namespace> = namespaces
        .iter()
        .map(|namespace| (namespace.name.as_str(), namespace))
        .collect();
    let canonical = serde_jcs::to_vec(&by_name)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[derive(Clone)]
pub struct ConfigFingerprintVerifier {
    namespaces: NamespaceStore,
    registry: FleetRegistry,
    deadline: Duration,
}

impl ConfigFingerprintVerifier {
    pub fn new(namespaces: NamespaceStore, registry: FleetRegistry, deadline: Duration) -> Self {
        Self {
            namespaces,
            registry,
            deadline,
        }
    }

    pub async fn expected_fingerprint(&self) -> CcResult<String> {
        let all = self.namespaces.list(&[]).await?;
        config_fingerprint(&all).map_err(|err| CcError::Storage(err.into()))
    }

    /// Poll every registered node under the global deadline.
    pub async fn verify(&self) -> CcResult<BTreeMap<String, NodeFingerprint>> {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let nodes = self.registry.nodes().await?;

        let mut set = JoinSet::new();
        for node in &nodes {
            let registry = self.registry.clone();
            let addr = node.addr.clone();
            set.spawn(async move {
                let result = registry.poll(&addr).await;
                (addr, result)
            });
        }

        let mut results = BTreeMap::new();
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((addr, Ok(fingerprint))))) => {
                    results.insert(addr, NodeFingerprint::Fingerprint { fingerprint });
                }
                Ok(Some(Ok((addr, Err(err))))) => {
                    let reason = match err {
                        CcError::Unreachable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    results.insert(addr, NodeFingerprint::Unreachable { reason });
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "verification poll task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }
        set.abort_all();

        let reason = if deadline_hit {
            DEADLINE_EXCEEDED
        } else {
            "poll task failed"
        };
        let abandoned: Vec<String> = nodes
            .into_iter()
            .map(|node| node.addr)
            .filter(|addr| !results.contains_key(addr))
            .collect();
        for addr in &abandoned {
            results.insert(
                addr.clone(),
                NodeFingerprint::Unreachable {
                    reason: reason.to_string(),
                },
            );
        }
        if !abandoned.is_empty() {
            self.spawn_mark_abandoned(abandoned, reason);
        }

        let unreachable = results.values().filter(|fp| fp.is_unreachable()).count();
        metrics::gauge!("cc_fleet_unreachable_nodes").set(unreachable as f64);
        metrics::histogram!("cc_verify_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            nodes = results.len(),
            unreachable,
            deadline_hit,
            "fleet verification finished"
        );
        Ok(results)
    }

    /// Record abandoned nodes as unreachable in the background so the pass
    /// returns at its deadline.
    fn spawn_mark_abandoned(&self, addrs: Vec<String>, reason: &'static str) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut marks = JoinSet::new();
            for addr in addrs {
                let registry = registry.clone();
                marks.spawn(async move {
                    if let Err(err) = registry.mark_unreachable(&addr, reason).await {
                        tracing::debug!(%addr, error = %err, "could not mark node unreachable");
                    }
                });
            }
            while marks.join_next().await.is_some() {}
        });
    }

    /// Expected fingerprint plus each node's sync state for one pass.
    pub async fn report(&self) -> CcResult<FleetReport> {
        let expected = self.expected_fingerprint().await?;
        let observed = self.verify().await?;
        let nodes = observed
            .into_iter()
            .map(|(addr, result)| {
                let report = match result {
                    NodeFingerprint::Fingerprint { fingerprint } => NodeReport {
                        state: if fingerprint == expected {
                            SyncState::InSync
                        } else {
                            SyncState::Drifted
                        },
                        observed: Some(fingerprint),
                        reason: None,
                    },
                    NodeFingerprint::Unreachable { reason } => NodeReport {
                        observed: None,
                        state: SyncState::Unknown,
                        reason: Some(reason),
                    },
                };
                (addr, report)
            })
            .collect();
        Ok(FleetReport { expected, nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::client::{NodeClient, NodeClientError};
    use crate::model::sample_namespace;
    use crate::store::memory::InMemoryStore;
    use crate::store::{ControlPlaneStore, StoreConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    enum Behaviour {
        Answer(String),
        Fail,
        Hang,
    }

    struct FakeFleet(HashMap<String, Behaviour>);

    #[async_trait]
    impl NodeClient for FakeFleet {
        async fn fetch_fingerprint(&self, addr: &str) -> Result<String, NodeClientError> {
            match self.0.get(addr) {
                Some(Behaviour::Answer(fp)) => Ok(fp.clone()),
                Some(Behaviour::Fail) => Err(NodeClientError::Status(500)),
                Some(Behaviour::Hang) | None => std::future::pending().await,
            }
        }
    }

    async fn verifier(
        fleet: Vec<(&str, Behaviour)>,
        poll_timeout: Duration,
        deadline: Duration,
    ) -> (ConfigFingerprintVerifier, FleetRegistry) {
        let store: Arc<dyn ControlPlaneStore> = Arc::new(InMemoryStore::new(StoreConfig {
            changes_limit: 10,
            change_retention_max_rows: Some(10),
        }));
        let namespaces = NamespaceStore::new(store.clone());
        namespaces
            .upsert(sample_namespace("shop"))
            .await
            .expect("namespace");
        let addrs: Vec<String> = fleet.iter().map(|(addr, _)| addr.to_string()).collect();
        let client = FakeFleet(
            fleet
                .into_iter()
                .map(|(addr, behaviour)| (addr.to_string(), behaviour))
                .collect(),
        );
        let registry = FleetRegistry::new(store, Arc::new(client), poll_timeout);
        for addr in addrs {
            registry.register(&addr).await.expect("register");
        }
        (
            ConfigFingerprintVerifier::new(namespaces, registry.clone(), deadline),
            registry,
        )
    }

    #[test]
    fn config_fingerprint_ignores_input_order() {
        let a = sample_namespace("a");
        let b = sample_namespace("b");
        let forward = config_fingerprint(&[a.clone(), b.clone()]).expect("fp");
        let backward = config_fingerprint(&[b, a]).expect("fp");
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 64);
        assert_ne!(forward, config_fingerprint(&[]).expect("empty"));
    }

    #[tokio::test]
    async fn report_classifies_each_node() {
        let expected = config_fingerprint(&[sample_namespace("shop")]).expect("expected");
        let (verifier, _) = verifier_with_expected(&expected).await;
        assert_eq!(
            verifier.expected_fingerprint().await.expect("expected"),
            expected
        );

        let report = verifier.report().await.expect("report");
        assert_eq!(report.expected, expected);
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(report.nodes["10.0.0.1:13307"].state, SyncState::InSync);
        assert_eq!(report.nodes["10.0.0.2:13307"].state, SyncState::Drifted);
        assert_eq!(
            report.nodes["10.0.0.2:13307"].observed.as_deref(),
            Some("stale")
        );
        assert_eq!(report.nodes["10.0.0.3:13307"].state, SyncState::Unknown);
        assert!(report.nodes["10.0.0.3:13307"].observed.is_none());
    }

    async fn verifier_with_expected(expected: &str) -> (ConfigFingerprintVerifier, FleetRegistry) {
        verifier(
            vec![
                ("10.0.0.1:13307", Behaviour::Answer(expected.to_string())),
                ("10.0.0.2:13307", Behaviour::Answer("stale".into())),
                ("10.0.0.3:13307", Behaviour::Fail),
            ],
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .await
    }

    #[tokio::test]
    async fn hung_nodes_cannot_stall_the_pass() {
        let (verifier, registry) = verifier(
            vec![
                ("10.0.0.1:13307", Behaviour::Answer("abc123".into())),
                ("10.0.0.2:13307", Behaviour::Hang),
            ],
            Duration::from_secs(30),
            Duration::from_millis(200),
        )
        .await;

        let started = std::time::Instant::now();
        let results = verifier.verify().await.expect("verify");
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(
            results["10.0.0.1:13307"],
            NodeFingerprint::Fingerprint {
                fingerprint: "abc123".into()
            }
        );
        assert_eq!(
            results["10.0.0.2:13307"],
            NodeFingerprint::Unreachable {
                reason: DEADLINE_EXCEEDED.into()
            }
        );
        let mut marked = false;
        for _ in 0..50 {
            let nodes = registry.nodes().await.expect("nodes");
            marked = nodes.iter().any(|node| {
                node.addr == "10.0.0.2:13307"
                    && node.last_error.as_deref() == Some(DEADLINE_EXCEEDED)
            });
            if marked {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marked, "abandoned node was never recorded");
        let snapshot = registry.snapshot().await.expect("snapshot");
        assert!(snapshot["10.0.0.2:13307"].is_unreachable());
        assert!(!snapshot["10.0.0.1:13307"].is_unreachable());
    }

    #[tokio::test]
    async fn many_hung_nodes_return_at_the_deadline() {
        let addrs: Vec<String> = (1..=40).map(|i| format!("10.0.1.{i}:13307")).collect();
        let (verifier, _) = verifier(
            addrs
                .iter()
                .map(|addr| (addr.as_str(), Behaviour::Hang))
                .collect(),
            Duration::from_secs(30),
            Duration::from_millis(150),
        )
        .await;
        let started = std::time::Instant::now();
        let results = verifier.verify().await.expect("verify");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results.len(), 40);
        assert!(results.values().all(NodeFingerprint::is_unreachable));
    }

    #[tokio::test]
    async fn per_node_timeout_applies_before_deadline() {
        let (verifier, _) = verifier(
            vec![("10.0.0.4:13307", Behaviour::Hang)],
            Duration::from_millis(50),
            Duration::from_secs(5),
        )
        .await;
        let results = verifier.verify().await.expect("verify");
        match &results["10.0.0.4:13307"] {
            NodeFingerprint::Unreachable { reason } => assert!(reason.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_fleet_verifies_to_empty_map() {
        let (verifier, _) = verifier(vec![], Duration::from_secs(1), Duration::from_secs(1)).await;
        assert!(verifier.verify().await.expect("verify").is_empty());
    }
}
