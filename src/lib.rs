//! Control-plane library crate for the sharding proxy fleet.
//!
//! # Purpose
//! Exposes the namespace configuration store, SQL fingerprinting and stats
//! aggregation, fleet fingerprint verification, and the admin HTTP surface for
//! use by the binary and tests.
//!
//! # Notes
//! Every component receives its backing store through its constructor; there
//! is no process-global configuration state.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod fleet;
pub mod model;
pub mod observability;
pub mod service;
pub mod sqlfp;
pub mod store;

pub use error::{CcError, CcResult};
