//! Admin HTTP API module.
//!
//! # Purpose
//! Exposes the `/api/cc` route handlers, their payload types, and the error
//! mapping shared by all of them.
pub mod error;
pub mod namespaces;
pub mod openapi;
pub mod proxy;
pub mod sql;
pub mod system;
pub mod types;
