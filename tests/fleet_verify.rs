mod common;

use axum::http::StatusCode;
use common::{empty_request, json_request, namespace_json, read_json};
use proxy_cc::app::{AppState, StateLimits, build_router};
use proxy_cc::fleet::HttpNodeClient;
use proxy_cc::model::{NodeStatus, SqlRecordLimits};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

async fn spawn_proxy(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    addr
}

async fn answering_proxy(fingerprint: &str) -> SocketAddr {
    let fingerprint = fingerprint.to_string();
    spawn_proxy(axum::Router::new().route(
        "/api/proxy/config/fingerprint",
        axum::routing::get(move || {
            let body = serde_json::json!({ "fingerprint": fingerprint });
            async move { axum::Json(body) }
        }),
    ))
    .await
}

async fn hanging_proxy() -> SocketAddr {
    spawn_proxy(axum::Router::new().route(
        "/api/proxy/config/fingerprint",
        axum::routing::get(|| async {
            std::future::pending::<()>().await;
            StatusCode::OK
        }),
    ))
    .await
}

fn state(poll_timeout: Duration, verify_deadline: Duration) -> AppState {
    AppState::new(
        common::memory_store(),
        Arc::new(HttpNodeClient::new(None).expect("client")),
        StateLimits {
            sql: SqlRecordLimits {
                max_entries: 16,
                max_sample_len: 256,
            },
            poll_timeout,
            verify_deadline,
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn hanging_proxy_is_cut_off_by_the_deadline() {
    let healthy = answering_proxy("abc123").await;
    let hung = hanging_proxy().await;
    let state = state(Duration::from_secs(30), Duration::from_millis(300));
    state
        .fleet
        .register(&healthy.to_string())
        .await
        .expect("register healthy");
    state
        .fleet
        .register(&hung.to_string())
        .await
        .expect("register hung");

    let started = Instant::now();
    let results = state.verifier.verify().await.expect("verify");
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(results.len(), 2);
    assert_eq!(results[&healthy.to_string()].fingerprint(), Some("abc123"));
    assert!(results[&hung.to_string()].is_unreachable());

    // Abandoned nodes are recorded in the background after the pass returns.
    let mut hung_node = None;
    for _ in 0..50 {
        let nodes = state.fleet.nodes().await.expect("nodes");
        hung_node = nodes
            .into_iter()
            .find(|node| node.addr == hung.to_string() && node.status == NodeStatus::Unreachable);
        if hung_node.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let hung_node = hung_node.expect("hung node marked unreachable");
    assert!(
        hung_node
            .last_error
            .as_deref()
            .is_some_and(|reason| reason.contains("deadline"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn fleet_report_over_http() {
    let state = state(Duration::from_millis(500), Duration::from_secs(2));
    let app = build_router(state.clone()).into_service();
    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/cc/namespace/modify",
            namespace_json("shop"),
        ))
        .await
        .expect("modify");
    assert_eq!(response.status(), StatusCode::OK);

    let expected = state.verifier.expected_fingerprint().await.expect("expected");
    let synced = answering_proxy(&expected).await;
    let stale = answering_proxy("0000").await;
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        listener.local_addr().expect("addr")
    };
    for addr in [synced, stale, closed] {
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/cc/proxy/register",
                serde_json::json!({ "addr": addr.to_string() }),
            ))
            .await
            .expect("register");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/cc/proxy/config/fingerprint"))
        .await
        .expect("report");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["expected"], expected.as_str());
    let nodes = &body["nodes"];
    assert_eq!(nodes[synced.to_string()]["state"], "in_sync");
    assert_eq!(nodes[stale.to_string()]["state"], "drifted");
    assert_eq!(nodes[closed.to_string()]["state"], "unknown");
    assert!(nodes[closed.to_string()]["observed"].is_null());
}

#[tokio::test(flavor = "multi_thread")]
async fn changing_a_namespace_changes_the_expected_fingerprint() {
    let state = state(Duration::from_millis(500), Duration::from_secs(1));
    let before = state.verifier.expected_fingerprint().await.expect("empty");
    state
        .namespaces
        .upsert(common::namespace("shop"))
        .await
        .expect("upsert");
    let after = state.verifier.expected_fingerprint().await.expect("one");
    assert_ne!(before, after);

    let mut changed = common::namespace("shop");
    changed.slow_sql_time_ms = 250;
    state.namespaces.upsert(changed).await.expect("update");
    let updated = state.verifier.expected_fingerprint().await.expect("updated");
    assert_ne!(after, updated);
}
