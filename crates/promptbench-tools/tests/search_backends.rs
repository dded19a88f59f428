//! `search_web` against local stand-ins for Brave and DuckDuckGo.
//!
//! A small axum server plays both backends so the fallback chain, the
//! freshness mapping and the error payloads are exercised over real HTTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use promptbench_agent::tools::{ToolHandler, ToolRegistry};
use promptbench_tools::WebSearch;

#[derive(Clone, Default)]
struct Backends {
    brave_status: Option<StatusCode>,
    ddg_status: Option<StatusCode>,
    ddg_html: String,
    brave_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    ddg_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn brave(State(b): State<Backends>, Query(q): Query<HashMap<String, String>>) -> Response {
    b.brave_queries.lock().unwrap().push(q);
    if let Some(status) = b.brave_status {
        return status.into_response();
    }
    Json(json!({"web": {"results": [
        {"title": "Rust 1.85", "url": "https://blog.rust-lang.org/2025/02/20/Rust-1.85.0.html",
         "description": "Rust 2024 edition is stable"},
        {"title": "Second", "url": "https://example.org/2", "description": "more"}
    ]}}))
    .into_response()
}

async fn duckduckgo(State(b): State<Backends>, Form(q): Form<HashMap<String, String>>) -> Response {
    b.ddg_queries.lock().unwrap().push(q);
    if let Some(status) = b.ddg_status {
        return status.into_response();
    }
    Html(b.ddg_html.clone()).into_response()
}

/// Serve the fake backends and return a tool pointed at them.
async fn serve(backends: Backends, brave_key: Option<&str>) -> WebSearch {
    let app = Router::new()
        .route("/brave", get(brave))
        .route("/ddg", post(duckduckgo))
        .with_state(backends);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    WebSearch::new(brave_key.map(str::to_owned), Duration::from_secs(5))
        .with_endpoints(format!("http://{addr}/brave"), format!("http://{addr}/ddg"))
}

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("arguments must be an object"),
    }
}

const DDG_HTML: &str = r#"
<div class="result">
  <a rel="nofollow" href="https://www.rust-lang.org/" class="result__a">Rust Programming Language</a>
  <a class="result__snippet">A language empowering everyone.</a>
</div>
"#;

#[tokio::test]
async fn brave_results_with_freshness() {
    let backends = Backends::default();
    let queries = Arc::clone(&backends.brave_queries);
    let tool = serve(backends, Some("test-key")).await;

    let out = tool
        .call(args(json!({"query": "rust release", "num_results": 9, "time_hint": "week"})))
        .await
        .unwrap();

    assert_eq!(out["provider"], "brave");
    assert_eq!(out["query"], "rust release");
    assert_eq!(out["num_results"], 2);
    assert_eq!(out["results"][0]["source"], "blog.rust-lang.org");
    assert_eq!(out["results"][0]["snippet"], "Rust 2024 edition is stable");

    let sent = queries.lock().unwrap()[0].clone();
    assert_eq!(sent["q"], "rust release");
    assert_eq!(sent["count"], "5", "num_results is clamped to 5");
    assert_eq!(sent["freshness"], "pw");
}

#[tokio::test]
async fn brave_failure_falls_back_to_duckduckgo() {
    let backends = Backends {
        brave_status: Some(StatusCode::TOO_MANY_REQUESTS),
        ddg_html: DDG_HTML.to_owned(),
        ..Backends::default()
    };
    let ddg_queries = Arc::clone(&backends.ddg_queries);
    let tool = serve(backends, Some("test-key")).await;

    let out = tool.call(args(json!({"query": "rust"}))).await.unwrap();

    assert_eq!(out["provider"], "duckduckgo");
    assert_eq!(out["results"][0]["title"], "Rust Programming Language");
    assert_eq!(out["results"][0]["url"], "https://www.rust-lang.org/");
    assert_eq!(ddg_queries.lock().unwrap()[0]["q"], "rust");
}

#[tokio::test]
async fn no_key_goes_straight_to_duckduckgo() {
    let backends = Backends::default();
    let brave_queries = Arc::clone(&backends.brave_queries);
    let tool = serve(backends, None).await;

    let out = tool.call(args(json!({"query": "obscure thing"}))).await.unwrap();

    assert!(brave_queries.lock().unwrap().is_empty());
    assert_eq!(out["provider"], "duckduckgo");
    assert_eq!(out["num_results"], 1);
    assert_eq!(out["results"][0]["title"], "No results found");
}

/// Backend failure surfaces through the registry as a failed result that
/// still carries the payload.
#[tokio::test]
async fn total_failure_is_an_error_payload() {
    let backends = Backends {
        ddg_status: Some(StatusCode::SERVICE_UNAVAILABLE),
        ..Backends::default()
    };
    let tool = serve(backends, None).await;
    let registry = ToolRegistry::new(Duration::from_secs(5)).with(tool);

    let result = registry
        .execute("search_web", args(json!({"query": "anything"})))
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Search failed: DuckDuckGo returned status 503")
    );
    assert_eq!(result.result.unwrap()["query"], "anything");
}
