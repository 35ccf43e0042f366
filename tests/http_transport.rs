//! The HTTP transport against a live scheduler server and a few scripted
//! endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use toolrelay::McpError;
use toolrelay::mcp::message::SESSION_HEADER;
use toolrelay::mcp::{Correlator, HttpTransport, McpClient, McpServerConfig};
use toolrelay::store::{self, TaskStore};
use warp::Filter;

/// Nothing listens here; connections are refused.
const DEAD: &str = "http://127.0.0.1:1/mcp";
const WAIT: Duration = Duration::from_secs(10);

struct Scheduler {
    _dir: TempDir,
    store: Arc<TaskStore>,
    base: String,
}

impl Scheduler {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json"), 16).await.unwrap());
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let (bound, server) = store::serve(Arc::clone(&store), addr).unwrap();
        tokio::spawn(server);
        Self {
            _dir: dir,
            store,
            base: format!("http://{}", bound),
        }
    }

    fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base)
    }
}

#[tokio::test]
async fn test_session_is_captured_and_echoed() {
    let scheduler = Scheduler::start().await;
    let client = McpClient::new("scheduler", McpServerConfig::http(vec![scheduler.mcp_url()]));

    let handshake = client.connect().await.unwrap();
    assert_eq!(handshake.server_info.name, "toolrelay-scheduler");
    let session = client.transport_token().await.expect("session id");

    let names: Vec<_> = client.get_tools().await.into_iter().map(|t| t.name).collect();
    assert!(names.contains(&"task_add".to_string()));

    // An unknown session header would be a 404; success means ours is echoed.
    let added = client
        .call_tool(
            "task_add",
            json!({"text": "water plants", "remind_at": "2026-06-01T09:00:00Z"}),
        )
        .await
        .unwrap();
    assert!(!added.is_error);
    let id = added.structured_content.unwrap()["id"].as_str().unwrap().to_string();
    assert_eq!(scheduler.store.get(&id).await.unwrap().text, "water plants");

    let listed = client.call_tool("task_list", Value::Null).await.unwrap();
    assert_eq!(listed.structured_content.unwrap()["tasks"][0]["id"], id.as_str());

    client.disconnect().await.unwrap();

    // Closing deleted the session on the server.
    let stale = reqwest::Client::new()
        .post(scheduler.mcp_url())
        .header(SESSION_HEADER, session)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status().as_u16(), 404);
}

#[tokio::test]
async fn test_tool_failure_comes_back_as_error_result() {
    let scheduler = Scheduler::start().await;
    let client = McpClient::new("scheduler", McpServerConfig::http(vec![scheduler.mcp_url()]));

    let result = client
        .call_tool("task_done", json!({"id": "no-such-task"}))
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(result.error_kind(), Some("not_found"));

    let err = client.call_tool("task_explode", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { .. }));
    client.disconnect().await.unwrap();
}

// ── Failover ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dead_endpoint_fails_over_to_next() {
    let scheduler = Scheduler::start().await;
    let client = McpClient::new(
        "scheduler",
        McpServerConfig::http(vec![DEAD.to_string(), scheduler.mcp_url()]),
    );

    client.connect().await.unwrap();
    let result = client
        .call_tool(
            "task_add",
            json!({"text": "failover", "remind_at": "2026-06-01T09:00:00+01:00"}),
        )
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(scheduler.store.list().await.unwrap().len(), 1);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_all_endpoints_dead_names_every_attempt() {
    let second = "http://127.0.0.1:2/mcp";
    let (transport, inbound) = HttpTransport::new([DEAD, second], WAIT).unwrap();
    let correlator = Correlator::new(Arc::new(transport), inbound);

    let err = correlator.call("ping", None, WAIT).await.unwrap_err();
    let McpError::AllEndpointsFailed { ref endpoints } = err else {
        panic!("expected all endpoints to fail, got {:?}", err);
    };
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints[0].starts_with(DEAD));
    assert!(endpoints[1].starts_with(second));
    assert!(err.retryable());
    assert_eq!(correlator.pending(), 0);

    // Through the client the same failure poisons the handshake.
    let client = McpClient::new("nowhere", McpServerConfig::http(vec![DEAD.to_string()]));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::HandshakeFailed(ref reason) if reason.contains(DEAD)));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_error_status_counts_as_endpoint_failure() {
    let refusing = warp::post().map(|| {
        warp::reply::with_status("maintenance", warp::http::StatusCode::SERVICE_UNAVAILABLE)
    });
    let (addr, server) = warp::serve(refusing).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let url = format!("http://{}/mcp", addr);
    let (transport, inbound) = HttpTransport::new([url.as_str()], WAIT).unwrap();
    let correlator = Correlator::new(Arc::new(transport), inbound);

    match correlator.call("ping", None, WAIT).await {
        Err(McpError::AllEndpointsFailed { endpoints }) => {
            assert_eq!(endpoints.len(), 1);
            assert!(endpoints[0].contains("503"));
        }
        other => panic!("expected an endpoint failure, got {:?}", other),
    }
}

// ── Event-stream replies ────────────────────────────────────────────────────

#[tokio::test]
async fn test_event_stream_reply_is_decoded() {
    let streaming = warp::post().and(warp::body::json()).map(|request: Value| {
        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"via": "sse"}});
        let body = format!(
            ": warming up\n\nevent: message\ndata: {}\n\ndata: {}\n\n",
            json!({"jsonrpc": "2.0", "method": "notifications/progress"}),
            reply
        );
        warp::http::Response::builder()
            .header("content-type", "text/event-stream")
            .body(body)
            .unwrap()
    });
    let (addr, server) = warp::serve(streaming).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let url = format!("http://{}/mcp", addr);
    let (transport, inbound) = HttpTransport::new([url.as_str()], WAIT).unwrap();
    let correlator = Correlator::new(Arc::new(transport), inbound);

    let value = correlator.call("ping", None, WAIT).await.unwrap();
    assert_eq!(value, json!({"via": "sse"}));
}

#[tokio::test]
async fn test_scheduler_event_stream_sees_changes() {
    let scheduler = Scheduler::start().await;
    let mut response = reqwest::get(format!("{}/sse", scheduler.base)).await.unwrap();
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let store = Arc::clone(&scheduler.store);
    let mut seen = String::new();
    let mut added = false;
    tokio::time::timeout(WAIT, async {
        while let Some(chunk) = response.chunk().await.unwrap() {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if !added && seen.contains("tasks_snapshot") {
                store
                    .create(store::NewTask::new("live", "2026-06-01T09:00:00Z"))
                    .await
                    .unwrap();
                added = true;
            }
            if seen.contains("task_added") {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert!(seen.contains("live"));
}
