//! Proxy node records and per-node fingerprint results.
//!
//! # Purpose
//! Defines what the fleet registry remembers about each proxy and the tagged
//! result reported for a node during verification.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct ProxyNode {
    pub addr: String,
    /// Last fingerprint observed by a successful poll, kept across failures.
    pub fingerprint: Option<String>,
    pub status: NodeStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unknown,
    Reachable,
    Unreachable,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Reachable => "reachable",
            NodeStatus::Unreachable => "unreachable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unknown" => Some(NodeStatus::Unknown),
            "reachable" => Some(NodeStatus::Reachable),
            "unreachable" => Some(NodeStatus::Unreachable),
            _ => None,
        }
    }
}

/// Outcome of a single poll, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Observed {
        fingerprint: String,
        at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

/// Per-node verification result.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeFingerprint {
    Fingerprint { fingerprint: String },
    Unreachable { reason: String },
}

impl NodeFingerprint {
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            NodeFingerprint::Fingerprint { fingerprint } => Some(fingerprint.as_str()),
            NodeFingerprint::Unreachable { .. } => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, NodeFingerprint::Unreachable { .. })
    }
}

impl From<&ProxyNode> for NodeFingerprint {
    fn from(node: &ProxyNode) -> Self {
        match (node.status, &node.fingerprint) {
            (NodeStatus::Reachable, Some(fingerprint)) => NodeFingerprint::Fingerprint {
                fingerprint: fingerprint.clone(),
            },
            (NodeStatus::Unknown, _) | (NodeStatus::Reachable, None) => {
                NodeFingerprint::Unreachable {
                    reason: "not polled yet".to_string(),
                }
            }
            (NodeStatus::Unreachable, _) => NodeFingerprint::Unreachable {
                reason: node
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unreachable".to_string()),
            },
        }
    }
}

/// True for `host:port` with a non-empty host and a non-zero port.
pub fn is_host_port(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    !host.is_empty()
        && !host.chars().any(char::is_whitespace)
        && port.parse::<u16>().is_ok_and(|port| port != 0)
}
