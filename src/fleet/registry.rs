//! Proxy fleet registry.
//!
//! # Purpose
//! Tracks registered proxy nodes and the last configuration fingerprint each
//! one reported. Polls go through a [`NodeClient`] and are always bounded by
//! the per-node poll timeout.
//!
//! # Key invariants
//! - A failed or timed-out poll marks the node `Unreachable` and keeps the
//!   last good fingerprint in the node record.
//! - Nodes only leave the registry through an explicit deregister.
use super::client::NodeClient;
use crate::error::{CcError, CcResult, ValidationError};
use crate::model::{NodeFingerprint, PollOutcome, ProxyNode, is_host_port};
use crate::store::ControlPlaneStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Clone)]
pub struct FleetRegistry {
    store: Arc<dyn ControlPlaneStore>,
    client: Arc<dyn NodeClient>,
    poll_timeout: Duration,
}

impl FleetRegistry {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        client: Arc<dyn NodeClient>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            poll_timeout,
        }
    }

    /// Register `addr`. Registering a known node is a no-op.
    pub async fn register(&self, addr: &str) -> CcResult<()> {
        let addr = addr.trim();
        if !is_host_port(addr) {
            return Err(ValidationError::InvalidAddress(addr.to_string()).into());
        }
        if self.store.register_proxy(addr).await? {
            tracing::info!(addr, "proxy registered");
        }
        Ok(())
    }

    pub async fn deregister(&self, addr: &str) -> CcResult<()> {
        self.store.deregister_proxy(addr).await?;
        tracing::info!(addr, "proxy deregistered");
        Ok(())
    }

    /// Fetch `addr`'s active fingerprint and record the outcome.
    pub async fn poll(&self, addr: &str) -> CcResult<String> {
        if self.store.proxy(addr).await?.is_none() {
            return Err(CcError::NotFound(format!("proxy {addr}")));
        }
        let fetched =
            match tokio::time::timeout(self.poll_timeout, self.client.fetch_fingerprint(addr))
                .await
            {
                Ok(Ok(fingerprint)) => Ok(fingerprint),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err(format!(
                    "timed out after {}ms",
                    self.poll_timeout.as_millis()
                )),
            };
        match fetched {
            Ok(fingerprint) => {
                self.store
                    .record_proxy_poll(
                        addr,
                        PollOutcome::Observed {
                            fingerprint: fingerprint.clone(),
                            at: Utc::now(),
                        },
                    )
                    .await?;
                metrics::counter!("cc_fleet_polls_total", "result" => "ok").increment(1);
                tracing::debug!(addr, %fingerprint, "proxy polled");
                Ok(fingerprint)
            }
            Err(reason) => {
                metrics::counter!("cc_fleet_polls_total", "result" => "unreachable").increment(1);
                tracing::warn!(addr, error = %reason, "proxy unreachable");
                self.mark_unreachable(addr, &reason).await?;
                Err(CcError::Unreachable {
                    addr: addr.to_string(),
                    reason,
                })
            }
        }
    }

    pub async fn mark_unreachable(&self, addr: &str, reason: &str) -> CcResult<()> {
        self.store
            .record_proxy_poll(
                addr,
                PollOutcome::Failed {
                    reason: reason.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Last known result per node, without contacting any node.
    pub async fn snapshot(&self) -> CcResult<BTreeMap<String, NodeFingerprint>> {
        let nodes = self.store.list_proxies().await?;
        let snapshot: BTreeMap<String, NodeFingerprint> = nodes
            .iter()
            .map(|node| (node.addr.clone(), NodeFingerprint::from(node)))
            .collect();
        let unreachable = snapshot.values().filter(|fp| fp.is_unreachable()).count();
        metrics::gauge!("cc_fleet_unreachable_nodes").set(unreachable as f64);
        Ok(snapshot)
    }

    pub async fn nodes(&self) -> CcResult<Vec<ProxyNode>> {
        Ok(self.store.list_proxies().await?)
    }

    /// Poll every registered node concurrently. Failures are recorded per node.
    pub async fn poll_all(&self) -> CcResult<()> {
        let nodes = self.store.list_proxies().await?;
        let mut set = JoinSet::new();
        for node in nodes {
            let registry = self.clone();
            set.spawn(async move { registry.poll(&node.addr).await.map(|_| ()) });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) | Ok(Err(CcError::Unreachable { .. })) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "fleet poll failed"),
                Err(err) => tracing::warn!(error = %err, "fleet poll task failed"),
            }
        }
        Ok(())
    }

    /// Refresh every node on `interval` until the returned task is aborted.
    pub fn spawn_poll_loop(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.poll_all().await {
                    tracing::warn!(error = %err, "fleet refresh failed");
                }
            }
        })
    }
}
