#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use proxy_cc::app::{AppState, StateLimits};
use proxy_cc::fleet::{NodeClient, NodeClientError};
use proxy_cc::model::{Namespace, SqlRecordLimits};
use proxy_cc::store::memory::InMemoryStore;
use proxy_cc::store::{ControlPlaneStore, StoreConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn raw_json_request(method: &str, uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// A minimal valid namespace: one slice, one user, one allowed database.
pub fn namespace_json(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "online": true,
        "allowed_dbs": {"shop_db": true},
        "slow_sql_time_ms": 1000,
        "slices": [{
            "name": "slice-0",
            "user_name": "root",
            "password": "secret",
            "master": "10.0.0.1:3306",
            "slaves": ["10.0.0.2:3306"],
            "capacity": 12,
            "max_capacity": 24
        }],
        "users": [{
            "user_name": "app",
            "password": "app-pass",
            "rw_flag": "read_write",
            "rw_split": true
        }]
    })
}

pub fn namespace(name: &str) -> Namespace {
    serde_json::from_value(namespace_json(name)).expect("namespace")
}

pub enum Reply {
    Fingerprint(String),
    Status(u16),
    Hang,
}

/// Fake proxy fleet keyed by address. Unknown addresses hang.
#[derive(Default)]
pub struct FakeFleet {
    replies: parking_lot::Mutex<HashMap<String, Reply>>,
}

impl FakeFleet {
    pub fn reply(&self, addr: &str, reply: Reply) {
        self.replies.lock().insert(addr.to_string(), reply);
    }
}

#[async_trait]
impl NodeClient for FakeFleet {
    async fn fetch_fingerprint(&self, addr: &str) -> Result<String, NodeClientError> {
        let outcome = match self.replies.lock().get(addr) {
            Some(Reply::Fingerprint(fp)) => Some(Ok(fp.clone())),
            Some(Reply::Status(code)) => Some(Err(NodeClientError::Status(*code))),
            Some(Reply::Hang) | None => None,
        };
        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

pub fn memory_store() -> Arc<dyn ControlPlaneStore> {
    Arc::new(InMemoryStore::new(StoreConfig {
        changes_limit: proxy_cc::config::DEFAULT_CHANGES_LIMIT,
        change_retention_max_rows: Some(proxy_cc::config::DEFAULT_CHANGE_RETENTION_MAX_ROWS),
    }))
}

pub fn state_with(
    fleet: Arc<FakeFleet>,
    poll_timeout: Duration,
    verify_deadline: Duration,
) -> AppState {
    AppState::new(
        memory_store(),
        fleet,
        StateLimits {
            sql: SqlRecordLimits {
                max_entries: 64,
                max_sample_len: 256,
            },
            poll_timeout,
            verify_deadline,
        },
    )
}
