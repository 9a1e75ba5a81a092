//! Control-plane configuration.
//!
//! # Purpose
//! Reads `PROXY_CC_*` environment variables into a [`CcConfig`], then applies
//! an optional YAML overlay named by `PROXY_CC_CONFIG`. Values present in the
//! overlay win over the environment.
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:9090";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9091";
pub const DEFAULT_CHANGES_LIMIT: u64 = 1_000;
pub const DEFAULT_CHANGE_RETENTION_MAX_ROWS: i64 = 10_000;
pub const DEFAULT_SQL_STATS_MAX_ENTRIES: usize = 1_024;
pub const DEFAULT_SQL_SAMPLE_MAX_LEN: usize = 4_096;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_VERIFY_DEADLINE_MS: u64 = 5_000;
pub const DEFAULT_FLEET_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other:?} (expected memory or postgres)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Basic credentials for the proxies' admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct CcConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub changes_limit: u64,
    pub change_retention_max_rows: Option<i64>,
    pub sql_stats_max_entries: usize,
    pub sql_sample_max_len: usize,
    pub poll_timeout_ms: u64,
    pub verify_deadline_ms: u64,
    /// `0` disables the background refresh loop.
    pub fleet_poll_interval_ms: u64,
    pub proxy_credentials: Option<ProxyCredentials>,
    /// Proxies registered at startup.
    pub proxies: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CcConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres_url: Option<String>,
    postgres_max_connections: Option<u32>,
    changes_limit: Option<u64>,
    change_retention_max_rows: Option<i64>,
    sql_stats_max_entries: Option<usize>,
    sql_sample_max_len: Option<usize>,
    poll_timeout_ms: Option<u64>,
    verify_deadline_ms: Option<u64>,
    fleet_poll_interval_ms: Option<u64>,
    proxy_user: Option<String>,
    proxy_password: Option<String>,
    proxies: Option<Vec<String>>,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("parse {key}: {err}")),
        Err(_) => Ok(default),
    }
}

impl Default for CcConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9091)),
            storage: StorageBackend::Memory,
            postgres: None,
            changes_limit: DEFAULT_CHANGES_LIMIT,
            change_retention_max_rows: Some(DEFAULT_CHANGE_RETENTION_MAX_ROWS),
            sql_stats_max_entries: DEFAULT_SQL_STATS_MAX_ENTRIES,
            sql_sample_max_len: DEFAULT_SQL_SAMPLE_MAX_LEN,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            verify_deadline_ms: DEFAULT_VERIFY_DEADLINE_MS,
            fleet_poll_interval_ms: DEFAULT_FLEET_POLL_INTERVAL_MS,
            proxy_credentials: None,
            proxies: Vec::new(),
        }
    }
}

impl CcConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("PROXY_CC_BIND", DEFAULT_BIND.to_string())?
            .parse()
            .with_context(|| "parse PROXY_CC_BIND")?;
        let metrics_bind = env_or("PROXY_CC_METRICS_BIND", DEFAULT_METRICS_BIND.to_string())?
            .parse()
            .with_context(|| "parse PROXY_CC_METRICS_BIND")?;
        let storage = env_or("PROXY_CC_STORAGE", StorageBackend::Memory)?;
        let postgres = match std::env::var("PROXY_CC_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_or(
                    "PROXY_CC_POSTGRES_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                connect_timeout_ms: env_or(
                    "PROXY_CC_POSTGRES_CONNECT_TIMEOUT_MS",
                    DEFAULT_PG_CONNECT_TIMEOUT_MS,
                )?,
                acquire_timeout_ms: env_or(
                    "PROXY_CC_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        let retention = env_or(
            "PROXY_CC_CHANGE_RETENTION_MAX_ROWS",
            DEFAULT_CHANGE_RETENTION_MAX_ROWS,
        )?;
        let proxy_credentials = match (
            std::env::var("PROXY_CC_PROXY_USER"),
            std::env::var("PROXY_CC_PROXY_PASSWORD"),
        ) {
            (Ok(user), Ok(password)) => Some(ProxyCredentials { user, password }),
            _ => None,
        };
        let proxies = std::env::var("PROXY_CC_PROXIES")
            .map(|value| split_list(&value))
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            changes_limit: env_or("PROXY_CC_CHANGES_LIMIT", DEFAULT_CHANGES_LIMIT)?,
            change_retention_max_rows: (retention > 0).then_some(retention),
            sql_stats_max_entries: env_or(
                "PROXY_CC_SQL_STATS_MAX_ENTRIES",
                DEFAULT_SQL_STATS_MAX_ENTRIES,
            )?,
            sql_sample_max_len: env_or("PROXY_CC_SQL_SAMPLE_MAX_LEN", DEFAULT_SQL_SAMPLE_MAX_LEN)?,
            poll_timeout_ms: env_or("PROXY_CC_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)?,
            verify_deadline_ms: env_or("PROXY_CC_VERIFY_DEADLINE_MS", DEFAULT_VERIFY_DEADLINE_MS)?,
            fleet_poll_interval_ms: env_or(
                "PROXY_CC_FLEET_POLL_INTERVAL_MS",
                DEFAULT_FLEET_POLL_INTERVAL_MS,
            )?,
            proxy_credentials,
            proxies,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("PROXY_CC_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read PROXY_CC_CONFIG: {path}"))?;
            let overlay: CcConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse control plane config yaml")?;
            config.apply(overlay)?;
        }
        config.check()?;
        Ok(config)
    }

    fn apply(&mut self, overlay: CcConfigOverride) -> Result<()> {
        if let Some(value) = overlay.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = overlay.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = overlay.storage {
            self.storage = value.parse()?;
        }
        if let Some(url) = overlay.postgres_url {
            let pg = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_PG_MAX_CONNECTIONS,
                connect_timeout_ms: DEFAULT_PG_CONNECT_TIMEOUT_MS,
                acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
            });
            pg.url = url;
        }
        if let (Some(max), Some(pg)) = (overlay.postgres_max_connections, self.postgres.as_mut()) {
            pg.max_connections = max;
        }
        if let Some(value) = overlay.changes_limit {
            self.changes_limit = value;
        }
        if let Some(value) = overlay.change_retention_max_rows {
            self.change_retention_max_rows = (value > 0).then_some(value);
        }
        if let Some(value) = overlay.sql_stats_max_entries {
            self.sql_stats_max_entries = value;
        }
        if let Some(value) = overlay.sql_sample_max_len {
            self.sql_sample_max_len = value;
        }
        if let Some(value) = overlay.poll_timeout_ms {
            self.poll_timeout_ms = value;
        }
        if let Some(value) = overlay.verify_deadline_ms {
            self.verify_deadline_ms = value;
        }
        if let Some(value) = overlay.fleet_poll_interval_ms {
            self.fleet_poll_interval_ms = value;
        }
        if let (Some(user), Some(password)) = (overlay.proxy_user, overlay.proxy_password) {
            self.proxy_credentials = Some(ProxyCredentials { user, password });
        }
        if let Some(proxies) = overlay.proxies {
            self.proxies = proxies;
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("PROXY_CC_STORAGE=postgres requires PROXY_CC_POSTGRES_URL");
        }
        if self.poll_timeout_ms == 0 || self.verify_deadline_ms == 0 {
            bail!("poll timeout and verify deadline must be positive");
        }
        if self.changes_limit == 0 {
            bail!("changes limit must be positive");
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn verify_deadline(&self) -> Duration {
        Duration::from_millis(self.verify_deadline_ms)
    }

    pub fn fleet_poll_interval(&self) -> Option<Duration> {
        (self.fleet_poll_interval_ms > 0).then(|| Duration::from_millis(self.fleet_poll_interval_ms))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "PROXY_CC_BIND",
        "PROXY_CC_METRICS_BIND",
        "PROXY_CC_STORAGE",
        "PROXY_CC_POSTGRES_URL",
        "PROXY_CC_POLL_TIMEOUT_MS",
        "PROXY_CC_VERIFY_DEADLINE_MS",
        "PROXY_CC_CHANGE_RETENTION_MAX_ROWS",
        "PROXY_CC_PROXY_USER",
        "PROXY_CC_PROXY_PASSWORD",
        "PROXY_CC_PROXIES",
        "PROXY_CC_CONFIG",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = KEYS
                .iter()
                .map(|key| (*key, std::env::var(key).ok()))
                .collect();
            for key in KEYS {
                unsafe {
                    std::env::remove_var(key);
                }
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, prev) in &self.saved {
                match prev {
                    Some(value) => unsafe {
                        std::env::set_var(key, value);
                    },
                    None => unsafe {
                        std::env::remove_var(key);
                    },
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        let _env = EnvGuard::clean();
        let config = CcConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.bind_addr, DEFAULT_BIND.parse().expect("addr"));
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.poll_timeout(), Duration::from_secs(3));
        assert_eq!(config.verify_deadline(), Duration::from_secs(5));
        assert!(config.proxy_credentials.is_none());
        assert!(config.proxies.is_empty());
    }

    #[test]
    #[serial]
    fn env_values_are_parsed() {
        let env = EnvGuard::clean();
        env.set("PROXY_CC_BIND", "127.0.0.1:7000");
        env.set("PROXY_CC_STORAGE", "postgres");
        env.set("PROXY_CC_POSTGRES_URL", "postgres://cc@localhost/cc");
        env.set("PROXY_CC_POLL_TIMEOUT_MS", "250");
        env.set("PROXY_CC_CHANGE_RETENTION_MAX_ROWS", "0");
        env.set("PROXY_CC_PROXY_USER", "admin");
        env.set("PROXY_CC_PROXY_PASSWORD", "secret");
        env.set("PROXY_CC_PROXIES", "10.0.0.1:13307, 10.0.0.2:13307,");

        let config = CcConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.postgres.as_ref().map(|pg| pg.url.as_str()),
            Some("postgres://cc@localhost/cc")
        );
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.change_retention_max_rows, None);
        assert_eq!(
            config.proxy_credentials,
            Some(ProxyCredentials {
                user: "admin".into(),
                password: "secret".into()
            })
        );
        assert_eq!(config.proxies, ["10.0.0.1:13307", "10.0.0.2:13307"]);
    }

    #[test]
    #[serial]
    fn invalid_env_values_are_rejected() {
        let env = EnvGuard::clean();
        env.set("PROXY_CC_POLL_TIMEOUT_MS", "soon");
        let err = CcConfig::from_env().expect_err("bad number");
        assert!(err.to_string().contains("PROXY_CC_POLL_TIMEOUT_MS"));

        let env = EnvGuard::clean();
        env.set("PROXY_CC_STORAGE", "postgres");
        let err = CcConfig::from_env_or_yaml().expect_err("missing url");
        assert!(err.to_string().contains("PROXY_CC_POSTGRES_URL"));
        drop(env);
    }

    #[test]
    #[serial]
    fn yaml_overlay_wins_over_env() {
        let env = EnvGuard::clean();
        let path = std::env::temp_dir().join(format!("proxy-cc-{}.yaml", std::process::id()));
        fs::write(
            &path,
            "bind_addr: 127.0.0.1:7100\nverify_deadline_ms: 900\nproxies:\n  - 10.1.0.1:13307\n",
        )
        .expect("write yaml");
        env.set("PROXY_CC_BIND", "127.0.0.1:7000");
        env.set("PROXY_CC_CONFIG", path.to_str().expect("utf8 path"));

        let config = CcConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.bind_addr.port(), 7100);
        assert_eq!(config.verify_deadline(), Duration::from_millis(900));
        assert_eq!(config.proxies, ["10.1.0.1:13307"]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn storage_backend_parsing() {
        assert_eq!(
            "Memory".parse::<StorageBackend>().expect("memory"),
            StorageBackend::Memory
        );
        assert_eq!(
            "pg".parse::<StorageBackend>().expect("pg"),
            StorageBackend::Postgres
        );
        assert!("etcd".parse::<StorageBackend>().is_err());
    }
}
