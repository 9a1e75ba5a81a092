//! Control-plane data model module.
//!
//! # Purpose
//! Re-exports the namespace, SQL fingerprint, and proxy node models used by
//! the store, service, and API layers.
mod namespace;
mod proxy;
mod sql;

pub use namespace::{
    Namespace, NamespaceChange, NamespaceChangeOp, RwFlag, ShardKind, ShardRule, Slice, User,
    validate_name,
};
pub use proxy::{NodeFingerprint, NodeStatus, PollOutcome, ProxyNode, is_host_port};
pub use sql::{SqlClass, SqlFingerprintSnapshot, SqlRecordLimits, SqlSample, truncate_sample};

#[cfg(test)]
pub(crate) use namespace::tests::sample_namespace;
