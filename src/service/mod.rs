//! Core control-plane services.
//!
//! # Purpose
//! Wraps the backing store with the rules the store does not own: namespace
//! validation before writes, and SQL normalization before stats are recorded.
mod namespaces;
mod sql_stats;

pub use namespaces::NamespaceStore;
pub use sql_stats::SqlStatsAggregator;
