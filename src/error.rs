//! Service-level error taxonomy.
//!
//! # Purpose
//! Defines the errors returned by the namespace store, SQL stats aggregator,
//! fleet registry, and verifier, and maps backing-store failures into them.
//!
//! # Key invariants
//! - Every variant carries a human-readable message that is safe to surface to
//!   the admin caller verbatim, except `Storage`, whose details are only logged.
//! - `Unreachable` is per node; the verifier folds it into per-node results and
//!   never returns it from a whole verification pass.
use crate::store::StoreError;
use thiserror::Error;

/// Malformed or incomplete input rejected before any store write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("namespace name is empty")]
    EmptyName,
    #[error("namespace name {0:?} must not contain whitespace or '/'")]
    InvalidName(String),
    #[error("namespace {0} has no backend slices")]
    NoSlices(String),
    #[error("slice name is empty")]
    EmptySliceName,
    #[error("slice {0} is defined more than once")]
    DuplicateSlice(String),
    #[error("slice {slice} has invalid master address {addr:?}")]
    InvalidMaster { slice: String, addr: String },
    #[error("slice {slice} has invalid slave address {addr:?}")]
    InvalidSlave { slice: String, addr: String },
    #[error("slice {slice} max_capacity {max_capacity} is below capacity {capacity}")]
    CapacityOutOfRange {
        slice: String,
        capacity: u32,
        max_capacity: u32,
    },
    #[error("default slice is empty but namespace has {0} slices")]
    AmbiguousDefaultSlice(usize),
    #[error("default slice {0} is not defined")]
    UnknownDefaultSlice(String),
    #[error("shard rule {rule} has no slices")]
    RuleWithoutSlices { rule: String },
    #[error("shard rule {rule} references unknown slice {slice}")]
    UnknownRuleSlice { rule: String, slice: String },
    #[error("shard rule {rule} has an empty shard key")]
    EmptyShardKey { rule: String },
    #[error("shard rule {rule} locations must match its {slices} slices and sum above zero")]
    InvalidLocations { rule: String, slices: usize },
    #[error("namespace {0} has no users")]
    NoUsers(String),
    #[error("user name is empty")]
    EmptyUserName,
    #[error("user {0} is defined more than once")]
    DuplicateUser(String),
    #[error("namespace {0} allows no databases")]
    NoAllowedDbs(String),
    #[error("invalid proxy address {0:?}, expected host:port")]
    InvalidAddress(String),
}

/// Error returned by every control-plane component.
#[derive(Debug, Error)]
pub enum CcError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("proxy {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type CcResult<T> = Result<T, CcError>;

impl From<StoreError> for CcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CcError::NotFound(what),
            StoreError::Conflict(what) => CcError::Conflict(what),
            StoreError::Unexpected(err) => CcError::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_service_errors() {
        let err: CcError = StoreError::NotFound("namespace shop".into()).into();
        assert!(matches!(err, CcError::NotFound(ref what) if what == "namespace shop"));

        let err: CcError = StoreError::Conflict("revision 3".into()).into();
        assert!(matches!(err, CcError::Conflict(_)));

        let err: CcError = StoreError::Unexpected(anyhow::anyhow!("pool closed")).into();
        assert!(matches!(err, CcError::Storage(_)));
    }

    #[test]
    fn validation_messages_are_actionable() {
        let err = CcError::from(ValidationError::UnknownRuleSlice {
            rule: "shop.orders".into(),
            slice: "slice-9".into(),
        });
        assert_eq!(
            err.to_string(),
            "shard rule shop.orders references unknown slice slice-9"
        );
    }
}
