//! Postgres-backed implementation of the control-plane store.
//!
//! # What this module is
//! Implements `ControlPlaneStore` on Postgres (via `sqlx`) so several control
//! plane replicas can share namespaces, SQL fingerprint buckets and the proxy
//! registry.
//!
//! # Data model
//! 1) **Authoritative tables** (`namespaces`, `sql_fingerprints`, `proxy_nodes`)
//!    hold current state. Namespaces are stored as a JSONB payload next to
//!    their revision.
//! 2) **Append-only change table** (`namespace_changes`) holds one row per
//!    namespace write, with a monotonically increasing `seq` assigned by
//!    Postgres.
//!
//! # Key invariants
//! - A namespace write and its change row commit in one transaction.
//! - Change rows are appended under a transaction-scoped advisory lock
//!   ([`CHANGE_LOG_LOCK_KEY`]), so `seq` order is commit order and a reader
//!   never sees a committed row above one that is still in flight.
//! - Compare-and-set writes are single conditional statements, so two writers
//!   holding the same revision cannot both succeed.
//! - `sql_fingerprints.namespace` references `namespaces.name` with
//!   `ON DELETE CASCADE`; deleting a namespace drops its buckets atomically.
//!
//! # Snapshot + changes contract
//! - `since` is inclusive (`seq >= since`).
//! - The head (`MAX(seq) + 1`, or `0` if the table is empty) is read before
//!   the rows. `next_seq` is the last returned `seq + 1`, or that head when
//!   nothing was returned.
//!
//! # Operational notes
//! - Migrations run at startup via `sqlx::migrate!("./migrations")`.
//! - An optional best-effort retention task bounds `namespace_changes` to the
//!   newest `N` rows. Failures are ignored and retried on the next tick.
//! - Database URLs may contain credentials; never log them.
use super::{ChangeSet, ControlPlaneStore, Snapshot, StoreConfig, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::model::{
    Namespace, NamespaceChange, NamespaceChangeOp, NodeStatus, PollOutcome, ProxyNode, SqlClass,
    SqlFingerprintSnapshot, SqlRecordLimits, SqlSample, truncate_sample,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "pg-tests")]
const RETENTION_TICK: Duration = Duration::from_secs(1);
#[cfg(not(feature = "pg-tests"))]
const RETENTION_TICK: Duration = Duration::from_secs(60);

/// Advisory lock key held by every writer while it appends to `namespace_changes`.
pub const CHANGE_LOG_LOCK_KEY: i64 = 0x7072_6f78_7963_6301;

/// Durable control-plane store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use proxy_cc::config::PostgresConfig;
/// use proxy_cc::store::{StoreConfig, postgres::PostgresStore};
///
/// async fn open(pg: PostgresConfig, cfg: StoreConfig) {
///     let _ = PostgresStore::connect(&pg, cfg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    config: StoreConfig,
}

#[derive(Debug, Clone, FromRow)]
struct DbNamespace {
    payload: Value,
}

/// Row shape for the `namespace_changes` table.
#[derive(Debug, Clone, FromRow)]
struct NamespaceChangeRow {
    seq: i64,
    op: String,
    name: String,
    revision: i64,
    payload: Option<Value>,
}

#[derive(Debug, Clone, FromRow)]
struct DbSqlFingerprint {
    class: String,
    fingerprint: String,
    sample: String,
    count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbProxyNode {
    addr: String,
    fingerprint: Option<String>,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl PostgresStore {
    /// Connect to Postgres, run migrations, and optionally start retention maintenance.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig, config: StoreConfig) -> StoreResult<Self> {
        // Fail fast on an unreachable database instead of hanging startup.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), pool)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("timed out connecting to postgres")))??;

        sqlx::migrate!("./migrations").run(&pool).await?;

        if let Some(retention) = config.change_retention_max_rows {
            spawn_retention_task(pool.clone(), retention);
        }

        let store = Self { pool, config };
        store.refresh_counts().await?;
        Ok(store)
    }

    fn limit(&self) -> i64 {
        self.config.changes_limit as i64
    }

    async fn refresh_counts(&self) -> StoreResult<()> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM namespaces")
            .fetch_one(&self.pool)
            .await?;
        metrics::gauge!("cc_namespaces_total").set(total as f64);
        Ok(())
    }

    async fn next_namespace_seq(&self) -> StoreResult<u64> {
        let next =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(seq) + 1, 0) FROM namespace_changes")
                .fetch_one(&self.pool)
                .await?;
        Ok(next as u64)
    }
}

/// Bound `namespace_changes` to the newest `max_rows` rows.
///
/// Clients that fall behind the retained window must re-bootstrap from a
/// snapshot. Transient errors are ignored; the task retries next tick.
fn spawn_retention_task(pool: PgPool, max_rows: i64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_TICK);
        loop {
            ticker.tick().await;
            let result = sqlx::query(
                "DELETE FROM namespace_changes WHERE seq < (SELECT COALESCE(MAX(seq) - $1 + 1, 0) FROM namespace_changes)",
            )
            .bind(max_rows)
            .execute(&pool)
            .await;
            if let Err(err) = result {
                tracing::debug!(error = %err, "namespace change retention failed");
            }
        }
    });
}

async fn append_namespace_change(
    tx: &mut Transaction<'_, Postgres>,
    op: NamespaceChangeOp,
    name: &str,
    revision: i64,
    payload: Option<Value>,
) -> StoreResult<()> {
    // Released on commit or rollback. `seq` is drawn only after the lock is held.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(CHANGE_LOG_LOCK_KEY)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        r#"INSERT INTO namespace_changes (op, name, revision, payload) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(change_op_to_str(op))
    .bind(name)
    .bind(revision)
    .bind(payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Namespace count as seen by the write transaction. Read before commit so
/// nothing fallible runs once the write is durable.
async fn count_namespaces(tx: &mut Transaction<'_, Postgres>) -> StoreResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM namespaces")
        .fetch_one(&mut **tx)
        .await?)
}

#[async_trait]
impl ControlPlaneStore for PostgresStore {
    async fn list_namespaces(&self, names: &[String]) -> StoreResult<Vec<Namespace>> {
        let rows = if names.is_empty() {
            sqlx::query_as::<_, DbNamespace>("SELECT payload FROM namespaces ORDER BY name")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, DbNamespace>(
                "SELECT payload FROM namespaces WHERE name = ANY($1) ORDER BY name",
            )
            .bind(names)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter()
            .map(|row| namespace_from_payload(row.payload))
            .collect()
    }

    async fn upsert_namespace(
        &self,
        namespace: Namespace,
        expected_revision: Option<u64>,
    ) -> StoreResult<u64> {
        let payload = serde_json::to_value(&namespace).map_err(|err| anyhow!(err))?;
        let mut tx = self.pool.begin().await?;
        let revision: Option<i64> = match expected_revision {
            None => {
                sqlx::query_scalar(
                    r#"INSERT INTO namespaces (name, revision, payload) VALUES ($1, 1, $2)
                       ON CONFLICT (name) DO UPDATE
                       SET revision = namespaces.revision + 1, payload = EXCLUDED.payload
                       RETURNING revision"#,
                )
                .bind(&namespace.name)
                .bind(&payload)
                .fetch_optional(&mut *tx)
                .await?
            }
            Some(0) => {
                sqlx::query_scalar(
                    r#"INSERT INTO namespaces (name, revision, payload) VALUES ($1, 1, $2)
                       ON CONFLICT (name) DO NOTHING
                       RETURNING revision"#,
                )
                .bind(&namespace.name)
                .bind(&payload)
                .fetch_optional(&mut *tx)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar(
                    r#"UPDATE namespaces SET revision = revision + 1, payload = $2
                       WHERE name = $1 AND revision = $3
                       RETURNING revision"#,
                )
                .bind(&namespace.name)
                .bind(&payload)
                .bind(expected as i64)
                .fetch_optional(&mut *tx)
                .await?
            }
        };
        let Some(revision) = revision else {
            return Err(StoreError::Conflict(format!(
                "namespace {} is not at revision {}",
                namespace.name,
                expected_revision.unwrap_or_default()
            )));
        };
        // Revisions restart at 1 whenever the row is (re)created.
        let op = if revision == 1 {
            NamespaceChangeOp::Created
        } else {
            NamespaceChangeOp::Updated
        };
        append_namespace_change(&mut tx, op, &namespace.name, revision, Some(payload)).await?;
        let total = count_namespaces(&mut tx).await?;
        tx.commit().await?;
        metrics::gauge!("cc_namespaces_total").set(total as f64);
        Ok(revision as u64)
    }

    async fn delete_namespace(&self, name: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let revision: Option<i64> =
            sqlx::query_scalar("DELETE FROM namespaces WHERE name = $1 RETURNING revision")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(revision) = revision else {
            return Err(StoreError::NotFound(format!("namespace {name}")));
        };
        append_namespace_change(&mut tx, NamespaceChangeOp::Deleted, name, revision, None).await?;
        let total = count_namespaces(&mut tx).await?;
        tx.commit().await?;
        metrics::gauge!("cc_namespaces_total").set(total as f64);
        Ok(())
    }

    async fn namespace_revision(&self, name: &str) -> StoreResult<Option<u64>> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM namespaces WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.map(|r| r as u64))
    }

    async fn namespace_snapshot(&self) -> StoreResult<Snapshot<Namespace>> {
        let next_seq = self.next_namespace_seq().await?;
        let items = self.list_namespaces(&[]).await?;
        Ok(Snapshot { items, next_seq })
    }

    async fn namespace_changes(&self, since: u64) -> StoreResult<ChangeSet<NamespaceChange>> {
        let head = self.next_namespace_seq().await?;
        let rows = sqlx::query_as::<_, NamespaceChangeRow>(
            r#"SELECT seq, op, name, revision, payload FROM namespace_changes WHERE seq >= $1 ORDER BY seq ASC LIMIT $2"#,
        )
        .bind(since as i64)
        .bind(self.limit())
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(NamespaceChange {
                seq: row.seq as u64,
                op: parse_change_op(&row.op)?,
                name: row.name,
                revision: row.revision as u64,
                namespace: row.payload.map(namespace_from_payload).transpose()?,
            });
        }
        Ok(ChangeSet::page(items, head))
    }

    async fn record_sql(
        &self,
        namespace: &str,
        class: SqlClass,
        fingerprint: &str,
        sample: &str,
        at: DateTime<Utc>,
        limits: SqlRecordLimits,
    ) -> StoreResult<u64> {
        let sample = truncate_sample(sample, limits.max_sample_len);
        let mut tx = self.pool.begin().await?;
        let upsert = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO sql_fingerprints (namespace, class, fingerprint, sample, count, first_seen, last_seen)
               VALUES ($1, $2, $3, $4, 1, $5, $5)
               ON CONFLICT (namespace, class, fingerprint) DO UPDATE
               SET count = sql_fingerprints.count + 1, sample = EXCLUDED.sample, last_seen = EXCLUDED.last_seen
               RETURNING count"#,
        )
        .bind(namespace)
        .bind(class.as_str())
        .bind(fingerprint)
        .bind(&sample)
        .bind(at)
        .fetch_one(&mut *tx)
        .await;
        let count = match upsert {
            Ok(count) => count,
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(StoreError::NotFound(format!("namespace {namespace}")));
            }
            Err(err) => return Err(err.into()),
        };

        if count == 1 && limits.max_entries > 0 {
            // Keep the newest `max_entries - 1` others plus the one just inserted.
            sqlx::query(
                r#"DELETE FROM sql_fingerprints
                   WHERE namespace = $1 AND class = $2 AND fingerprint IN (
                       SELECT fingerprint FROM sql_fingerprints
                       WHERE namespace = $1 AND class = $2 AND fingerprint <> $3
                       ORDER BY last_seen DESC, fingerprint
                       OFFSET $4
                   )"#,
            )
            .bind(namespace)
            .bind(class.as_str())
            .bind(fingerprint)
            .bind(limits.max_entries as i64 - 1)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(count as u64)
    }

    async fn sql_fingerprints(&self, namespace: &str) -> StoreResult<SqlFingerprintSnapshot> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM namespaces WHERE name = $1)")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(StoreError::NotFound(format!("namespace {namespace}")));
        }
        let rows = sqlx::query_as::<_, DbSqlFingerprint>(
            r#"SELECT class, fingerprint, sample, count, first_seen, last_seen
               FROM sql_fingerprints WHERE namespace = $1"#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        let mut snapshot = SqlFingerprintSnapshot::default();
        for row in rows {
            let class = SqlClass::parse(&row.class)
                .ok_or_else(|| anyhow!("invalid sql class {}", row.class))?;
            snapshot.class_mut(class).insert(
                row.fingerprint,
                SqlSample {
                    sample: row.sample,
                    count: row.count as u64,
                    first_seen: row.first_seen,
                    last_seen: row.last_seen,
                },
            );
        }
        Ok(snapshot)
    }

    async fn register_proxy(&self, addr: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO proxy_nodes (addr, status) VALUES ($1, $2) ON CONFLICT (addr) DO NOTHING"#,
        )
        .bind(addr)
        .bind(NodeStatus::Unknown.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deregister_proxy(&self, addr: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM proxy_nodes WHERE addr = $1")
            .bind(addr)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("proxy {addr}")));
        }
        Ok(())
    }

    async fn record_proxy_poll(&self, addr: &str, outcome: PollOutcome) -> StoreResult<()> {
        let result = match outcome {
            PollOutcome::Observed { fingerprint, at } => {
                sqlx::query(
                    r#"UPDATE proxy_nodes SET fingerprint = $2, status = $3, last_seen = $4, last_error = NULL
                       WHERE addr = $1"#,
                )
                .bind(addr)
                .bind(fingerprint)
                .bind(NodeStatus::Reachable.as_str())
                .bind(at)
                .execute(&self.pool)
                .await?
            }
            PollOutcome::Failed { reason } => {
                sqlx::query(r#"UPDATE proxy_nodes SET status = $2, last_error = $3 WHERE addr = $1"#)
                    .bind(addr)
                    .bind(NodeStatus::Unreachable.as_str())
                    .bind(reason)
                    .execute(&self.pool)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("proxy {addr}")));
        }
        Ok(())
    }

    async fn proxy(&self, addr: &str) -> StoreResult<Option<ProxyNode>> {
        let row = sqlx::query_as::<_, DbProxyNode>(
            "SELECT addr, fingerprint, status, last_seen, last_error FROM proxy_nodes WHERE addr = $1",
        )
        .bind(addr)
        .fetch_optional(&self.pool)
        .await?;
        row.map(proxy_from_row).transpose()
    }

    async fn list_proxies(&self) -> StoreResult<Vec<ProxyNode>> {
        let rows = sqlx::query_as::<_, DbProxyNode>(
            "SELECT addr, fingerprint, status, last_seen, last_error FROM proxy_nodes ORDER BY addr",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(proxy_from_row).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn namespace_from_payload(payload: Value) -> StoreResult<Namespace> {
    serde_json::from_value(payload)
        .map_err(|err| StoreError::Unexpected(anyhow!("corrupt namespace payload: {err}")))
}

fn proxy_from_row(row: DbProxyNode) -> StoreResult<ProxyNode> {
    let status = NodeStatus::parse(&row.status)
        .ok_or_else(|| anyhow!("invalid node status {}", row.status))?;
    Ok(ProxyNode {
        addr: row.addr,
        fingerprint: row.fingerprint,
        status,
        last_seen: row.last_seen,
        last_error: row.last_error,
    })
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

fn change_op_to_str(op: NamespaceChangeOp) -> &'static str {
    match op {
        NamespaceChangeOp::Created => "Created",
        NamespaceChangeOp::Updated => "Updated",
        NamespaceChangeOp::Deleted => "Deleted",
    }
}

fn parse_change_op(value: &str) -> StoreResult<NamespaceChangeOp> {
    match value {
        "Created" => Ok(NamespaceChangeOp::Created),
        "Updated" => Ok(NamespaceChangeOp::Updated),
        "Deleted" => Ok(NamespaceChangeOp::Deleted),
        _ => Err(StoreError::Unexpected(anyhow!("invalid change op {value}"))),
    }
}
