//! Proxy fleet tracking and configuration drift detection.
//!
//! # Purpose
//! Groups the node client, the registry of known proxies, and the verifier
//! that compares each proxy's active configuration with the stored one.
pub mod client;
mod registry;
mod verify;

pub use client::{HttpNodeClient, NodeClient, NodeClientError};
pub use registry::FleetRegistry;
pub use verify::{ConfigFingerprintVerifier, FleetReport, NodeReport, SyncState, config_fingerprint};
