//! End-to-end coverage of the main loop against fixture agent and webhook
//! servers, exercising the literal scenarios in §8.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ease_handler::{Handler, HandlerItem};
use ease_worker::{HandlersConfig, WorkerConfig};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

#[derive(Default)]
struct AgentState {
    pending: VecDeque<Value>,
    acked: Vec<String>,
    statuses: Vec<Value>,
    results: Vec<Value>,
    proxy_results: Vec<(u16, HeaderMap, Vec<u8>)>,
}

#[derive(Default)]
struct WebhookState {
    calls: Vec<(String, String, Vec<u8>)>,
}

fn envelope(request_id: &str, mode: &str, enqueue_at: i64, ttl: i64, webhook: &str, body: &str) -> Value {
    serde_json::json!({
        "headers": {
            "Ease-Mode": mode,
            "Ease-Request-Id": request_id,
            "Ease-Enqueue-At": enqueue_at.to_string(),
            "Ease-Time-To-Live": ttl.to_string(),
            "Ease-Webhook": webhook,
        },
        "body": STANDARD.encode(body),
    })
}

async fn spawn_agent(state: Arc<Mutex<AgentState>>) -> String {
    let router = Router::new()
        .route(
            "/apis/v1/request",
            get(|State(state): State<Arc<Mutex<AgentState>>>| async move {
                let mut state = state.lock().await;
                match state.pending.pop_front() {
                    Some(task) => (axum::http::StatusCode::OK, Json(task)).into_response(),
                    None => axum::http::StatusCode::NOT_FOUND.into_response(),
                }
            }),
        )
        .route(
            "/apis/v1/request-ack/{id}",
            post(
                |Path(id): Path<String>, State(state): State<Arc<Mutex<AgentState>>>| async move {
                    state.lock().await.acked.push(id);
                    axum::http::StatusCode::OK
                },
            ),
        )
        .route(
            "/apis/v1/request-metric/{id}",
            post(
                |_: Path<String>, State(state): State<Arc<Mutex<AgentState>>>, Json(body): Json<Value>| async move {
                    state.lock().await.statuses.push(body);
                    axum::http::StatusCode::OK
                },
            ),
        )
        .route(
            "/apis/v1/request-result/{id}",
            post(
                |_: Path<String>, State(state): State<Arc<Mutex<AgentState>>>, Json(body): Json<Value>| async move {
                    state.lock().await.results.push(body);
                    axum::http::StatusCode::OK
                },
            ),
        )
        .route(
            "/apis/v1/request-proxy/{id}",
            post(
                |_: Path<String>,
                 Query(params): Query<std::collections::HashMap<String, String>>,
                 State(state): State<Arc<Mutex<AgentState>>>,
                 headers: HeaderMap,
                 body: axum::body::Bytes| async move {
                    let status_code: u16 = params
                        .get("statusCode")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    state.lock().await.proxy_results.push((status_code, headers, body.to_vec()));
                    axum::http::StatusCode::OK
                },
            ),
        )
        .route(
            "/apis/v1/heartbeat",
            post(|| async { axum::http::StatusCode::OK }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_webhook(state: Arc<Mutex<WebhookState>>) -> String {
    let router = Router::new()
        .route(
            "/",
            post(
                |Query(params): Query<std::collections::HashMap<String, String>>,
                 State(state): State<Arc<Mutex<WebhookState>>>,
                 body: axum::body::Bytes| async move {
                    let request_id = params.get("requestID").cloned().unwrap_or_default();
                    let status_code = params.get("statusCode").cloned().unwrap_or_default();
                    state.lock().await.calls.push((request_id, status_code, body.to_vec()));
                    axum::http::StatusCode::OK
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_handler_mode_delivers_to_webhook_and_agent() {
    let agent_state = Arc::new(Mutex::new(AgentState::default()));
    let webhook_state = Arc::new(Mutex::new(WebhookState::default()));

    let webhook_url = spawn_webhook(webhook_state.clone()).await;
    agent_state.lock().await.pending.push_back(envelope(
        "r1",
        "sync",
        1_000,
        600_000,
        &webhook_url,
        r#"{"input": {"x": 1}}"#,
    ));
    let agent_url = spawn_agent(agent_state.clone()).await;

    let handler = Arc::new(Handler::plain(|_input| Ok(HandlerItem::Bytes(b"ok".to_vec()))));
    let config = WorkerConfig {
        agent_url,
        heartbeat_interval_secs: 3600,
        handlers: HandlersConfig::handler(handler, None),
        test_mode: false,
    };

    tokio::spawn(async move {
        let _ = ease_worker::run(config).await;
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    let agent = agent_state.lock().await;
    assert_eq!(agent.acked, vec!["r1".to_string()]);
    assert_eq!(agent.results.len(), 1);
    assert_eq!(agent.results[0]["statusCode"], 200);
    assert_eq!(agent.results[0]["data"], "b2s=");

    let statuses: Vec<String> = agent
        .statuses
        .iter()
        .map(|s| s["status"].as_str().unwrap().to_string())
        .collect();
    assert!(statuses.contains(&"executing".to_string()));
    assert_eq!(statuses.last().unwrap(), "succeed");

    let webhook = webhook_state.lock().await;
    assert_eq!(webhook.calls.len(), 1);
    assert_eq!(webhook.calls[0].0, "r1");
    assert_eq!(webhook.calls[0].1, "200");
    assert_eq!(webhook.calls[0].2, b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_raise_reports_failure_and_500_webhook() {
    let agent_state = Arc::new(Mutex::new(AgentState::default()));
    let webhook_state = Arc::new(Mutex::new(WebhookState::default()));

    let webhook_url = spawn_webhook(webhook_state.clone()).await;
    agent_state.lock().await.pending.push_back(envelope(
        "r2",
        "sync",
        1_000,
        600_000,
        &webhook_url,
        r#"{"input": {"x": 1}}"#,
    ));
    let agent_url = spawn_agent(agent_state.clone()).await;

    let handler = Arc::new(Handler::plain(|_input| panic!("boom")));
    let config = WorkerConfig {
        agent_url,
        heartbeat_interval_secs: 3600,
        handlers: HandlersConfig::handler(handler, None),
        test_mode: false,
    };

    tokio::spawn(async move {
        let _ = ease_worker::run(config).await;
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    let webhook = webhook_state.lock().await;
    assert_eq!(webhook.calls.len(), 1);
    assert_eq!(webhook.calls[0].1, "500");
    let body: Value = serde_json::from_slice(&webhook.calls[0].2).unwrap();
    assert_eq!(
        body["error"],
        "custom handler raise exception during running, err: boom"
    );

    let agent = agent_state.lock().await;
    let statuses: Vec<String> = agent
        .statuses
        .iter()
        .map(|s| s["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses.last().unwrap(), "failed");
    assert_eq!(agent.acked, vec!["r2".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn ttl_expired_skips_handler_and_reports_failed() {
    let agent_state = Arc::new(Mutex::new(AgentState::default()));
    let webhook_state = Arc::new(Mutex::new(WebhookState::default()));

    let webhook_url = spawn_webhook(webhook_state.clone()).await;
    agent_state.lock().await.pending.push_back(envelope(
        "r3", "sync", 0, 1, &webhook_url, r#"{"input": 1}"#,
    ));
    let agent_url = spawn_agent(agent_state.clone()).await;

    let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let invoked_clone = invoked.clone();
    let handler = Arc::new(Handler::plain(move |_input| {
        invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(HandlerItem::Bytes(vec![]))
    }));
    let config = WorkerConfig {
        agent_url,
        heartbeat_interval_secs: 3600,
        handlers: HandlersConfig::handler(handler, None),
        test_mode: false,
    };

    tokio::spawn(async move {
        let _ = ease_worker::run(config).await;
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    let webhook = webhook_state.lock().await;
    assert_eq!(webhook.calls.len(), 1);
    assert_eq!(webhook.calls[0].1, "408");

    let agent = agent_state.lock().await;
    assert_eq!(agent.acked, vec!["r3".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_mode_body_webhook_overrides_header_webhook() {
    let agent_state = Arc::new(Mutex::new(AgentState::default()));
    let webhook_state = Arc::new(Mutex::new(WebhookState::default()));
    let override_state = Arc::new(Mutex::new(WebhookState::default()));

    let header_webhook_url = spawn_webhook(webhook_state.clone()).await;
    let override_webhook_url = spawn_webhook(override_state.clone()).await;
    agent_state.lock().await.pending.push_back(envelope(
        "r4",
        "async",
        1_000,
        600_000,
        &header_webhook_url,
        &format!(r#"{{"input": {{"x": 1}}, "webhook": "{override_webhook_url}"}}"#),
    ));
    let agent_url = spawn_agent(agent_state.clone()).await;

    let handler = Arc::new(Handler::plain(|_input| Ok(HandlerItem::Bytes(b"ok".to_vec()))));
    let config = WorkerConfig {
        agent_url,
        heartbeat_interval_secs: 3600,
        handlers: HandlersConfig::handler(handler, None),
        test_mode: false,
    };

    tokio::spawn(async move {
        let _ = ease_worker::run(config).await;
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(webhook_state.lock().await.calls.is_empty());
    let overridden = override_state.lock().await;
    assert_eq!(overridden.calls.len(), 1);
    assert_eq!(overridden.calls[0].0, "r4");
    assert_eq!(overridden.calls[0].1, "200");
    assert_eq!(overridden.calls[0].2, b"ok");

    let agent = agent_state.lock().await;
    assert_eq!(agent.acked, vec!["r4".to_string()]);
    let statuses: Vec<String> = agent
        .statuses
        .iter()
        .map(|s| s["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses.last().unwrap(), "succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_mode_streams_chunks_without_content_length_and_strips_hop_by_hop() {
    let upstream_router = Router::new().route(
        "/api/42",
        get(|| async {
            let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
                (0..10).map(|i| Ok(i.to_string().into_bytes())).collect();
            let stream = futures::stream::iter(chunks);
            let mut response = axum::response::Response::new(Body::from_stream(stream));
            response
                .headers_mut()
                .insert("connection", "keep-alive".parse().unwrap());
            response
        }),
    );
    let upstream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(upstream_listener, upstream_router).await.unwrap();
    });

    let agent_state = Arc::new(Mutex::new(AgentState::default()));
    agent_state.lock().await.pending.push_back(envelope(
        "r5",
        "sync",
        1_000,
        600_000,
        "",
        r#"{"method":"GET","uri":"/api/42","header":{}}"#,
    ));
    let agent_url = spawn_agent(agent_state.clone()).await;

    let base_url = Url::parse(&format!("http://{upstream_addr}")).unwrap();
    let check_start: ease_proxy::CheckStartFn = Box::new(|| Box::pin(async { true }));
    let config = WorkerConfig {
        agent_url,
        heartbeat_interval_secs: 3600,
        handlers: HandlersConfig::proxy(base_url, check_start),
        test_mode: false,
    };

    tokio::spawn(async move {
        let _ = ease_worker::run(config).await;
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    let agent = agent_state.lock().await;
    assert_eq!(agent.proxy_results.len(), 1);
    let (status_code, headers, body) = &agent.proxy_results[0];
    assert_eq!(*status_code, 200);
    assert!(!headers.contains_key("connection"));
    let expected: Vec<u8> = (0..10).flat_map(|i: i32| i.to_string().into_bytes()).collect();
    assert_eq!(body, &expected);

    let statuses: Vec<String> = agent
        .statuses
        .iter()
        .map(|s| s["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses.last().unwrap(), "succeed");
    assert_eq!(agent.acked, vec!["r5".to_string()]);
}
