//! SQL fingerprint bucket definitions.
//!
//! # Purpose
//! Defines the slow/error SQL classes and the per-namespace snapshot returned
//! by the stats aggregator.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SqlClass {
    Slow,
    Error,
}

impl SqlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlClass::Slow => "slow",
            SqlClass::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "slow" => Some(SqlClass::Slow),
            "error" => Some(SqlClass::Error),
            _ => None,
        }
    }
}

impl fmt::Display for SqlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fingerprint bucket: a representative statement and how often it was seen.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct SqlSample {
    pub sample: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default, PartialEq, Eq)]
pub struct SqlFingerprintSnapshot {
    pub slow: BTreeMap<String, SqlSample>,
    pub error: BTreeMap<String, SqlSample>,
}

impl SqlFingerprintSnapshot {
    pub fn class_mut(&mut self, class: SqlClass) -> &mut BTreeMap<String, SqlSample> {
        match class {
            SqlClass::Slow => &mut self.slow,
            SqlClass::Error => &mut self.error,
        }
    }
}

/// Bounds applied when a statement is recorded.
#[derive(Debug, Clone, Copy)]
pub struct SqlRecordLimits {
    /// Fingerprints kept per namespace and class; the least recently seen is evicted.
    pub max_entries: usize,
    pub max_sample_len: usize,
}

/// Cut `sample` to at most `max_len` bytes without splitting a character.
pub fn truncate_sample(sample: &str, max_len: usize) -> String {
    if sample.len() <= max_len {
        return sample.to_string();
    }
    let mut end = max_len;
    while !sample.is_char_boundary(end) {
        end -= 1;
    }
    sample[..end].to_string()
}
