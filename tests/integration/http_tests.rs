//! Integration tests for the HTTP front end.
//!
//! Each test serves a real engine on an ephemeral port and talks to it
//! with `reqwest`.

use std::net::SocketAddr;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use replgate::gateway::http::{self, HttpState};
use replgate::{Engine, EngineConfig};

use super::test_helpers::{
    spawn_line_tool, spawn_recorded, spawn_welcome_tool, wait_until, Observed, WELCOME_TOOL,
};

/// Echoes every line, taking a full second to answer `slow`.
const SLOWER_ECHO_TOOL: &str =
    r#"while read l; do if [ "$l" = slow ]; then sleep 1; fi; echo "$l"; done"#;

const USAGE: &str = "Need POST (`curl -d '...' $URL`) or DELETE (`curl -X DELETE ...`).\n";

/// Serve `engine` on `route` at an ephemeral port.
///
/// Caller must cancel the returned token to shut the server down.
async fn serve(engine: Engine, route: &str) -> (String, CancellationToken) {
    let listener = http::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let ct = CancellationToken::new();
    let router = http::router(route, HttpState::new(engine, None));
    tokio::spawn(http::serve(listener, router, ct.clone()));

    (format!("http://{addr}{route}"), ct)
}

#[tokio::test]
async fn get_returns_usage_hint() {
    let engine = spawn_line_tool("cat");
    let (url, ct) = serve(engine.clone(), "/").await;

    let resp = reqwest::get(&url).await.expect("request");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.text().await.expect("body"), USAGE);

    let resp = reqwest::Client::new()
        .put(&url)
        .body("x")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn post_runs_the_query() {
    let engine = spawn_line_tool("cat");
    let (url, ct) = serve(engine.clone(), "/cat").await;
    let client = reqwest::Client::new();

    let resp = client.post(&url).body("hello").send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(resp.text().await.expect("body"), "hello\n");

    let resp = client
        .post(&url)
        .body("\n\t  padded  \n\n")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "padded\n");

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn invalid_bodies_are_server_errors() {
    let engine = spawn_line_tool("cat");
    let (url, ct) = serve(engine.clone(), "/").await;
    let client = reqwest::Client::new();

    let resp = client.post(&url).body("  \n \t ").send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.expect("body"), "Need a nonempty query.\n");

    let resp = client.post(&url).body("foo\nbar").send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.expect("body"), "Need a single-line query.\n");

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn other_routes_are_not_served() {
    let engine = spawn_line_tool("cat");
    let (url, ct) = serve(engine.clone(), "/tool").await;

    let other = url.replace("/tool", "/elsewhere");
    let resp = reqwest::Client::new()
        .post(&other)
        .body("x")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn not_ready_is_service_unavailable() {
    let engine = spawn_recorded(EngineConfig::new(WELCOME_TOOL).with_prompt("WELCOME")).0;
    let (url, ct) = serve(engine.clone(), "/").await;

    let resp = reqwest::Client::new()
        .post(&url)
        .body("early")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.text().await.expect("body"), "Not available yet.\n");

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn prompt_mode_returns_multi_line_results() {
    let engine = spawn_welcome_tool().await;
    let (url, ct) = serve(engine.clone(), "/").await;

    let resp = reqwest::Client::new()
        .post(&url)
        .body("yay")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "test\nyay\npassed\n");

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn delete_stops_the_tool_once() {
    let engine = spawn_line_tool("cat");
    let (url, ct) = serve(engine.clone(), "/").await;
    let client = reqwest::Client::new();

    let resp = client.delete(&url).send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "Terminating.\n");

    let resp = client.delete(&url).send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "Already terminated.\n");

    engine.wait_stopped().await;
    let resp = client.post(&url).body("late").send().await.expect("request");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    ct.cancel();
}

#[tokio::test]
async fn client_disconnect_cancels_the_in_flight_query() {
    let (engine, observer) = spawn_recorded(EngineConfig::new(SLOWER_ECHO_TOOL));
    let (url, ct) = serve(engine.clone(), "/").await;

    let abandoned = {
        let url = url.clone();
        tokio::spawn(async move { reqwest::Client::new().post(&url).body("slow").send().await })
    };
    wait_until(&observer, "the slow query to be dispatched", |events| {
        events
            .iter()
            .any(|event| matches!(event, Observed::Dispatch(_, query) if query == "slow"))
    })
    .await;
    abandoned.abort();

    wait_until(&observer, "the query to be canceled", |events| {
        events.iter().any(|event| {
            matches!(event, Observed::Complete(_, Err(msg)) if msg == "Canceled. Connection closed.")
        })
    })
    .await;

    // The tool still answers the abandoned query; nobody gets that answer.
    wait_until(&observer, "the late answer", |events| {
        events.contains(&Observed::ProtocolError("slow".into()))
    })
    .await;

    let resp = reqwest::Client::new()
        .post(&url)
        .body("next")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "next\n");

    ct.cancel();
    engine.stop();
}

#[tokio::test]
async fn bind_conflict_is_a_bind_error() {
    let listener = http::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let err = http::bind(addr).await.expect_err("address in use");
    assert!(matches!(err, replgate::AppError::Bind(_)));
    assert_eq!(err.exit_code(), 2);
}
