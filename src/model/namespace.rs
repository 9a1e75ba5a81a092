//! Namespace configuration model and validation.
//!
//! # Purpose
//! Defines the namespace object pushed to proxies (backend slices, shard
//! rules, users, SQL policy) together with its change-log payloads, and the
//! full-object validation run before every write.
//!
//! # Key invariants
//! - Validation is pure; it never rewrites the object, so what is stored is
//!   exactly what was submitted.
//! - Every shard rule references slices defined in the same namespace.
use super::proxy::is_host_port;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub allowed_dbs: BTreeMap<String, bool>,
    #[serde(default)]
    pub default_phy_dbs: BTreeMap<String, String>,
    /// Queries slower than this are reported as slow SQL by proxies.
    #[serde(default)]
    pub slow_sql_time_ms: u64,
    #[serde(default)]
    pub max_sql_execute_time_ms: u64,
    #[serde(default)]
    pub max_sql_result_size: i64,
    #[serde(default)]
    pub black_sql: Vec<String>,
    #[serde(default)]
    pub allowed_ip: Vec<String>,
    #[serde(default)]
    pub slices: Vec<Slice>,
    #[serde(default)]
    pub shard_rules: Vec<ShardRule>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub default_slice: String,
}

/// Backend connection group: one master and its read replicas.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct Slice {
    pub name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub max_capacity: u32,
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct ShardRule {
    pub db: String,
    pub table: String,
    pub kind: ShardKind,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub slices: Vec<String>,
    #[serde(default)]
    pub locations: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShardKind {
    Hash,
    Mod,
    Range,
    Date,
    Global,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct User {
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    pub rw_flag: RwFlag,
    #[serde(default)]
    pub rw_split: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RwFlag {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct NamespaceChange {
    pub seq: u64,
    pub op: NamespaceChangeOp,
    pub name: String,
    pub revision: u64,
    pub namespace: Option<Namespace>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NamespaceChangeOp {
    Created,
    Updated,
    Deleted,
}

impl ShardRule {
    fn label(&self) -> String {
        format!("{}.{}", self.db, self.table)
    }
}

impl Namespace {
    /// Slice used for statements no shard rule matches.
    ///
    /// An empty `default_slice` resolves to the only slice when there is
    /// exactly one.
    pub fn effective_default_slice(&self) -> Option<&str> {
        if !self.default_slice.is_empty() {
            return Some(self.default_slice.as_str());
        }
        match self.slices.as_slice() {
            [only] => Some(only.name.as_str()),
            _ => None,
        }
    }

    /// Check the whole object. The first defect found is returned.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;

        if self.allowed_dbs.is_empty() {
            return Err(ValidationError::NoAllowedDbs(self.name.clone()));
        }

        if self.slices.is_empty() {
            return Err(ValidationError::NoSlices(self.name.clone()));
        }
        let mut slice_names = HashSet::with_capacity(self.slices.len());
        for slice in &self.slices {
            if slice.name.trim().is_empty() {
                return Err(ValidationError::EmptySliceName);
            }
            if !slice_names.insert(slice.name.as_str()) {
                return Err(ValidationError::DuplicateSlice(slice.name.clone()));
            }
            if !is_host_port(&slice.master) {
                return Err(ValidationError::InvalidMaster {
                    slice: slice.name.clone(),
                    addr: slice.master.clone(),
                });
            }
            if let Some(bad) = slice.slaves.iter().find(|addr| !is_host_port(addr)) {
                return Err(ValidationError::InvalidSlave {
                    slice: slice.name.clone(),
                    addr: bad.clone(),
                });
            }
            if slice.max_capacity < slice.capacity {
                return Err(ValidationError::CapacityOutOfRange {
                    slice: slice.name.clone(),
                    capacity: slice.capacity,
                    max_capacity: slice.max_capacity,
                });
            }
        }

        match self.effective_default_slice() {
            None => return Err(ValidationError::AmbiguousDefaultSlice(self.slices.len())),
            Some(name) if !slice_names.contains(name) => {
                return Err(ValidationError::UnknownDefaultSlice(name.to_string()));
            }
            Some(_) => {}
        }

        for rule in &self.shard_rules {
            if rule.slices.is_empty() {
                return Err(ValidationError::RuleWithoutSlices { rule: rule.label() });
            }
            if let Some(unknown) = rule
                .slices
                .iter()
                .find(|slice| !slice_names.contains(slice.as_str()))
            {
                return Err(ValidationError::UnknownRuleSlice {
                    rule: rule.label(),
                    slice: unknown.clone(),
                });
            }
            if rule.kind != ShardKind::Global && rule.key.trim().is_empty() {
                return Err(ValidationError::EmptyShardKey { rule: rule.label() });
            }
            if matches!(rule.kind, ShardKind::Hash | ShardKind::Mod) {
                let total: u64 = rule.locations.iter().map(|&n| u64::from(n)).sum();
                if rule.locations.len() != rule.slices.len() || total == 0 {
                    return Err(ValidationError::InvalidLocations {
                        rule: rule.label(),
                        slices: rule.slices.len(),
                    });
                }
            }
        }

        if self.users.is_empty() {
            return Err(ValidationError::NoUsers(self.name.clone()));
        }
        let mut user_names = HashSet::with_capacity(self.users.len());
        for user in &self.users {
            if user.user_name.trim().is_empty() {
                return Err(ValidationError::EmptyUserName);
            }
            if !user_names.insert(user.user_name.as_str()) {
                return Err(ValidationError::DuplicateUser(user.user_name.clone()));
            }
        }
        Ok(())
    }
}

/// Namespace names double as store keys and URL path segments.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_namespace(name: &str) -> Namespace {
        Namespace {
            name: name.to_string(),
            online: true,
            read_only: false,
            allowed_dbs: BTreeMap::from([("shop_db".to_string(), true)]),
            default_phy_dbs: BTreeMap::new(),
            slow_sql_time_ms: 1000,
            max_sql_execute_time_ms: 0,
            max_sql_result_size: 0,
            black_sql: Vec::new(),
            allowed_ip: Vec::new(),
            slices: vec![Slice {
                name: "slice-0".to_string(),
                user_name: "root".to_string(),
                password: "secret".to_string(),
                master: "10.0.0.1:3306".to_string(),
                slaves: vec!["10.0.0.2:3306".to_string()],
                capacity: 12,
                max_capacity: 24,
                idle_timeout_secs: 60,
            }],
            shard_rules: Vec::new(),
            users: vec![User {
                user_name: "app".to_string(),
                password: "app-pass".to_string(),
                rw_flag: RwFlag::ReadWrite,
                rw_split: true,
            }],
            default_slice: String::new(),
        }
    }

    fn with_second_slice(mut ns: Namespace) -> Namespace {
        ns.slices.push(Slice {
            name: "slice-1".to_string(),
            user_name: "root".to_string(),
            password: "secret".to_string(),
            master: "10.0.1.1:3306".to_string(),
            slaves: Vec::new(),
            capacity: 12,
            max_capacity: 24,
            idle_timeout_secs: 60,
        });
        ns.default_slice = "slice-0".to_string();
        ns
    }

    #[test]
    fn valid_namespace_passes() {
        let ns = sample_namespace("shop");
        ns.validate().expect("valid");
        assert_eq!(ns.effective_default_slice(), Some("slice-0"));
    }

    #[test]
    fn empty_or_malformed_name_is_rejected() {
        assert_eq!(
            sample_namespace("").validate(),
            Err(ValidationError::EmptyName)
        );
        assert_eq!(
            sample_namespace("   ").validate(),
            Err(ValidationError::EmptyName)
        );
        assert!(matches!(
            sample_namespace("a/b").validate(),
            Err(ValidationError::InvalidName(_))
        ));
    }

    #[test]
    fn slices_are_required_and_unique() {
        let mut ns = sample_namespace("shop");
        ns.slices.clear();
        assert_eq!(ns.validate(), Err(ValidationError::NoSlices("shop".into())));

        let mut ns = sample_namespace("shop");
        ns.slices.push(ns.slices[0].clone());
        assert_eq!(
            ns.validate(),
            Err(ValidationError::DuplicateSlice("slice-0".into()))
        );
    }

    #[test]
    fn slice_addresses_and_capacity_are_checked() {
        let mut ns = sample_namespace("shop");
        ns.slices[0].master = "10.0.0.1".to_string();
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::InvalidMaster { .. })
        ));

        let mut ns = sample_namespace("shop");
        ns.slices[0].slaves.push("replica:notaport".to_string());
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::InvalidSlave { .. })
        ));

        let mut ns = sample_namespace("shop");
        ns.slices[0].max_capacity = 1;
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::CapacityOutOfRange { .. })
        ));
    }

    #[test]
    fn default_slice_must_resolve() {
        let mut ns = with_second_slice(sample_namespace("shop"));
        ns.default_slice.clear();
        assert_eq!(
            ns.validate(),
            Err(ValidationError::AmbiguousDefaultSlice(2))
        );

        ns.default_slice = "slice-7".to_string();
        assert_eq!(
            ns.validate(),
            Err(ValidationError::UnknownDefaultSlice("slice-7".into()))
        );
    }

    #[test]
    fn shard_rules_must_reference_known_slices() {
        let mut ns = with_second_slice(sample_namespace("shop"));
        ns.shard_rules.push(ShardRule {
            db: "shop_db".to_string(),
            table: "orders".to_string(),
            kind: ShardKind::Hash,
            key: "user_id".to_string(),
            slices: vec!["slice-0".to_string(), "slice-1".to_string()],
            locations: vec![2, 2],
        });
        ns.validate().expect("valid rule");

        ns.shard_rules[0].slices[1] = "slice-9".to_string();
        assert_eq!(
            ns.validate(),
            Err(ValidationError::UnknownRuleSlice {
                rule: "shop_db.orders".into(),
                slice: "slice-9".into(),
            })
        );
    }

    #[test]
    fn hash_rules_need_matching_locations_and_key() {
        let mut ns = with_second_slice(sample_namespace("shop"));
        ns.shard_rules.push(ShardRule {
            db: "shop_db".to_string(),
            table: "orders".to_string(),
            kind: ShardKind::Mod,
            key: "user_id".to_string(),
            slices: vec!["slice-0".to_string(), "slice-1".to_string()],
            locations: vec![4],
        });
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::InvalidLocations { slices: 2, .. })
        ));

        ns.shard_rules[0].locations = vec![0, 0];
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::InvalidLocations { .. })
        ));

        ns.shard_rules[0].locations = vec![1, 1];
        ns.shard_rules[0].key.clear();
        assert!(matches!(
            ns.validate(),
            Err(ValidationError::EmptyShardKey { .. })
        ));

        ns.shard_rules[0].kind = ShardKind::Global;
        ns.validate().expect("global rules need no key");
    }

    #[test]
    fn users_and_dbs_are_required() {
        let mut ns = sample_namespace("shop");
        ns.users.clear();
        assert_eq!(ns.validate(), Err(ValidationError::NoUsers("shop".into())));

        let mut ns = sample_namespace("shop");
        ns.users.push(ns.users[0].clone());
        assert_eq!(
            ns.validate(),
            Err(ValidationError::DuplicateUser("app".into()))
        );

        let mut ns = sample_namespace("shop");
        ns.allowed_dbs.clear();
        assert_eq!(
            ns.validate(),
            Err(ValidationError::NoAllowedDbs("shop".into()))
        );
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let ns: Namespace = serde_json::from_value(serde_json::json!({
            "name": "shop",
            "allowed_dbs": {"shop_db": true},
            "slices": [{"name": "slice-0", "master": "10.0.0.1:3306"}],
            "users": [{"user_name": "app", "rw_flag": "read_write"}]
        }))
        .expect("decode");
        assert!(ns.shard_rules.is_empty());
        ns.validate().expect("valid");
    }
}
