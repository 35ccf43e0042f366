//! HTTP surface for a [`ToolServer`]: JSON-RPC over `POST /mcp` with
//! session ids issued on `initialize`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use super::{ToolServer, handle_raw};
use crate::error::{McpError, codes};
use crate::mcp::message::{Message, PROTOCOL_HEADER, PROTOCOL_VERSION, SESSION_HEADER};

const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

/// Most sessions kept at once; issuing past this evicts the least recently
/// used one.
pub const MAX_SESSIONS: usize = 1024;

/// A session unused for this long is forgotten.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Session ids handed out by this server, with their last use.
#[derive(Debug, Clone)]
pub struct Sessions {
    ids: Arc<RwLock<HashMap<String, Instant>>>,
    max: usize,
    idle: Duration,
}

impl Default for Sessions {
    fn default() -> Self {
        Self::with_limits(MAX_SESSIONS, SESSION_IDLE_TIMEOUT)
    }
}

impl Sessions {
    pub fn with_limits(max: usize, idle: Duration) -> Self {
        Self {
            ids: Arc::new(RwLock::new(HashMap::new())),
            max: max.max(1),
            idle,
        }
    }

    pub async fn issue(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut ids = self.ids.write().await;

        let before = ids.len();
        ids.retain(|_, last| now.duration_since(*last) < self.idle);
        if ids.len() >= self.max {
            let oldest = ids
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                ids.remove(&oldest);
            }
        }
        let forgotten = before - ids.len();
        if forgotten > 0 {
            debug!(forgotten, "Forgot stale sessions");
        }

        ids.insert(id.clone(), now);
        id
    }

    /// Whether `id` is live; refreshes its last use when it is.
    pub async fn touch(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut ids = self.ids.write().await;
        match ids.get_mut(id) {
            Some(last) if now.duration_since(*last) < self.idle => {
                *last = now;
                true
            }
            Some(_) => {
                ids.remove(id);
                false
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.ids.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }
}

fn with_clone<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    warp::reply::with_status(
        warp::reply::json(&json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": code, "message": message }
        })),
        status,
    )
    .into_response()
}

/// `POST /mcp`, `POST /`, `DELETE /mcp` and `GET /health`.
pub fn routes<S: ToolServer>(server: Arc<S>, sessions: Sessions) -> BoxedFilter<(Response,)> {
    let endpoint = warp::path("mcp")
        .and(warp::path::end())
        .or(warp::path::end())
        .unify();

    let post = endpoint
        .and(warp::post())
        .and(warp::header::optional::<String>(SESSION_HEADER))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_clone(server))
        .and(with_clone(sessions.clone()))
        .then(handle_post::<S>);

    let delete = warp::path("mcp")
        .and(warp::path::end())
        .and(warp::delete())
        .and(warp::header::optional::<String>(SESSION_HEADER))
        .and(with_clone(sessions))
        .then(|session: Option<String>, sessions: Sessions| async move {
            match session {
                Some(id) if sessions.remove(&id).await => {
                    debug!(session = %id, "Session ended");
                    StatusCode::NO_CONTENT.into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })).into_response());

    post.or(delete).unify().or(health).unify().boxed()
}

async fn handle_post<S: ToolServer>(
    session: Option<String>,
    body: Bytes,
    server: Arc<S>,
    sessions: Sessions,
) -> Response {
    if let Some(id) = &session {
        // Requests without the header are served as legacy, session-less calls.
        if !sessions.touch(id).await {
            return rpc_error(StatusCode::NOT_FOUND, codes::INVALID_REQUEST, "unknown session");
        }
    }

    let raw = String::from_utf8_lossy(&body);
    let is_initialize = serde_json::from_str::<Value>(&raw)
        .ok()
        .and_then(|v| v.get("method")?.as_str().map(|m| m == "initialize"))
        .unwrap_or(false);

    let Some(reply) = handle_raw(server.as_ref(), &raw).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let succeeded = matches!(&reply, Message::Response(r) if r.outcome.is_ok());
    let session = if is_initialize && succeeded {
        let id = sessions.issue().await;
        debug!(session = %id, "Session issued");
        Some(id)
    } else {
        session
    };

    let json = warp::reply::json(&reply);
    let json = warp::reply::with_header(json, PROTOCOL_HEADER, PROTOCOL_VERSION);
    match session {
        Some(id) => warp::reply::with_header(json, SESSION_HEADER, id).into_response(),
        None => json.into_response(),
    }
}

/// Bind `routes` to `addr`. Port 0 picks a free port; the bound address is
/// returned with the server future.
pub fn bind(
    routes: BoxedFilter<(Response,)>,
    addr: SocketAddr,
) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), McpError> {
    let (bound, server) = warp::serve(routes)
        .try_bind_ephemeral(addr)
        .map_err(|e| McpError::Transport(format!("bind {}: {}", addr, e)))?;
    info!(addr = %bound, "HTTP server listening");
    Ok((bound, server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::EchoServer;

    fn filter() -> (BoxedFilter<(Response,)>, Sessions) {
        let sessions = Sessions::default();
        (routes(Arc::new(EchoServer), sessions.clone()), sessions)
    }

    #[tokio::test]
    async fn test_initialize_issues_session() {
        let (routes, sessions) = filter();
        let res = warp::test::request()
            .method("POST")
            .path("/mcp")
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 200);
        let id = res.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert!(sessions.touch(&id).await);

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header(SESSION_HEADER, &id)
            .body(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()[SESSION_HEADER], id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let (routes, _) = filter();
        let res = warp::test::request()
            .method("POST")
            .path("/mcp")
            .header(SESSION_HEADER, "forged")
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let (routes, _) = filter();
        let res = warp::test::request()
            .method("POST")
            .path("/mcp")
            .body(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 202);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn test_delete_ends_session() {
        let (routes, sessions) = filter();
        let id = sessions.issue().await;
        let res = warp::test::request()
            .method("DELETE")
            .path("/mcp")
            .header(SESSION_HEADER, &id)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 204);
        assert_eq!(sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_sessions_are_bounded() {
        let sessions = Sessions::with_limits(2, SESSION_IDLE_TIMEOUT);
        let first = sessions.issue().await;
        let second = sessions.issue().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(sessions.touch(&first).await);

        // `second` is now the least recently used.
        let third = sessions.issue().await;
        assert_eq!(sessions.len().await, 2);
        assert!(!sessions.touch(&second).await);
        assert!(sessions.touch(&first).await);
        assert!(sessions.touch(&third).await);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let sessions = Sessions::with_limits(MAX_SESSIONS, Duration::from_millis(20));
        let stale = sessions.issue().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sessions.touch(&stale).await);

        let idle = sessions.issue().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        sessions.issue().await;
        assert_eq!(sessions.len().await, 1);
        assert!(!sessions.touch(&idle).await);
    }

    #[tokio::test]
    async fn test_health() {
        let (routes, _) = filter();
        let res = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body().as_ref(), br#"{"status":"ok"}"#);
    }
}
