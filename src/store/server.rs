//! Scheduler tool server: the task store over the tool protocol, a legacy
//! `/messages` endpoint and a live `/sse` event stream.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, instrument, warn};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::sse::Event;
use warp::{Filter, Reply};

use super::StoreError;
use super::file::TaskStore;
use super::model::{NewTask, TaskStatus};
use crate::error::{McpError, Result};
use crate::mcp::message::Implementation;
use crate::mcp::tools::ToolDescriptor;
use crate::server::http::{self as rpc_http, Sessions};
use crate::server::{ToolParam, ToolServer, input_schema, parse_args, to_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerTool {
    TaskAdd,
    TaskList,
    TaskDone,
    TaskDelete,
    TaskSetStatus,
}

impl SchedulerTool {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn descriptor(self) -> ToolDescriptor {
        const ID: ToolParam = ToolParam::required("id", "string", "Task id.");
        let (description, params) = match self {
            Self::TaskAdd => (
                "Schedule a reminder.",
                vec![
                    ToolParam::required("text", "string", "What to be reminded of."),
                    ToolParam::required(
                        "remind_at",
                        "string",
                        "When, as ISO-8601 with a timezone offset (e.g. 2026-03-01T09:30:00+03:00).",
                    ),
                ],
            ),
            Self::TaskList => ("List all reminders.", Vec::new()),
            Self::TaskDone => ("Mark a reminder as done.", vec![ID]),
            Self::TaskDelete => ("Delete a reminder. Unknown ids are ignored.", vec![ID]),
            Self::TaskSetStatus => (
                "Set a reminder's status to pending or done.",
                vec![
                    ID,
                    ToolParam::required("status", "string", "\"pending\" or \"done\"."),
                ],
            ),
        };
        ToolDescriptor {
            name: self.name().to_string(),
            description: Some(description.to_string()),
            input_schema: input_schema(&params),
        }
    }
}

#[derive(Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Deserialize)]
struct StatusArgs {
    id: String,
    status: TaskStatus,
}

/// Serves a shared [`TaskStore`].
#[derive(Debug, Clone)]
pub struct SchedulerServer {
    store: Arc<TaskStore>,
}

impl SchedulerServer {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }
}

#[async_trait]
impl ToolServer for SchedulerServer {
    fn info(&self) -> Implementation {
        Implementation::new("toolrelay-scheduler", env!("CARGO_PKG_VERSION"))
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        SchedulerTool::iter().map(SchedulerTool::descriptor).collect()
    }

    #[instrument(skip(self, arguments))]
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool: SchedulerTool = name
            .parse()
            .map_err(|_| McpError::UnknownTool(name.to_string()))?;
        let store = &self.store;

        match tool {
            SchedulerTool::TaskAdd => {
                let new: NewTask = parse_args(name, arguments)?;
                to_output(&store.create(new).await?)
            }
            SchedulerTool::TaskList => {
                let tasks = store.list().await?;
                Ok(json!({ "tasks": to_output(&tasks)? }))
            }
            SchedulerTool::TaskDone => {
                let args: IdArgs = parse_args(name, arguments)?;
                to_output(&store.complete(&args.id).await?)
            }
            SchedulerTool::TaskDelete => {
                let args: IdArgs = parse_args(name, arguments)?;
                let deleted = store.delete(&args.id).await?;
                Ok(json!({ "id": args.id, "deleted": deleted }))
            }
            SchedulerTool::TaskSetStatus => {
                let args: StatusArgs = parse_args(name, arguments)?;
                to_output(&store.set_status(&args.id, args.status).await?)
            }
        }
    }
}

// ── HTTP surface ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LegacyCall {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

fn legacy_reply(status: StatusCode, kind: &str, content: Value) -> Response {
    warp::reply::with_status(
        warp::reply::json(&json!({ "type": kind, "content": content })),
        status,
    )
    .into_response()
}

async fn handle_legacy(server: Arc<SchedulerServer>, body: bytes::Bytes) -> Response {
    let call: LegacyCall = match serde_json::from_slice(&body) {
        Ok(call) => call,
        Err(e) => {
            return legacy_reply(StatusCode::BAD_REQUEST, "error", json!(e.to_string()));
        }
    };

    match server.call_tool(&call.tool, call.arguments).await {
        Ok(mut value) => {
            // Legacy clients expect the bare list for task_list.
            if call.tool == SchedulerTool::TaskList.name() {
                value = value["tasks"].take();
            }
            legacy_reply(StatusCode::OK, "result", value)
        }
        Err(e) => {
            let status = match &e {
                McpError::UnknownTool(_)
                | McpError::InvalidArguments(_)
                | McpError::Store(StoreError::Invalid(_)) => StatusCode::BAD_REQUEST,
                McpError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                _ => {
                    warn!(tool = %call.tool, error = %e, "Legacy tool call failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            legacy_reply(status, "error", json!(e.to_string()))
        }
    }
}

async fn handle_sse(store: Arc<TaskStore>) -> Response {
    // Subscribe before the snapshot so no change falls between the two.
    let subscription = store.subscribe();
    let tasks = match store.list().await {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "Snapshot for event stream failed");
            return legacy_reply(StatusCode::INTERNAL_SERVER_ERROR, "error", json!(e.to_string()));
        }
    };
    debug!(
        tasks = tasks.len(),
        subscribers = store.subscriber_count(),
        "Event stream subscriber connected"
    );

    let snapshot = Event::default().event("tasks_snapshot").json_data(&tasks);
    let live = stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        let frame = Event::default().event(event.name()).json_data(event.data());
        Some((frame, sub))
    });
    let events = stream::once(async move { snapshot }).chain(live);

    warp::sse::reply(warp::sse::keep_alive().stream(events)).into_response()
}

fn with_clone<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

/// All scheduler routes: `/mcp`, `/`, `/messages`, `/sse`, `/health`.
pub fn routes(server: Arc<SchedulerServer>, sessions: Sessions) -> BoxedFilter<(Response,)> {
    let messages = warp::path("messages")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_clone(Arc::clone(&server)))
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::bytes())
        .then(handle_legacy);

    let sse = warp::path("sse")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_clone(Arc::clone(server.store())))
        .then(handle_sse);

    rpc_http::routes(server, sessions)
        .or(messages)
        .unify()
        .or(sse)
        .unify()
        .boxed()
}

/// Bind the scheduler on `addr`. Await the returned future to run it.
pub fn serve(
    store: Arc<TaskStore>,
    addr: SocketAddr,
) -> Result<(SocketAddr, impl Future<Output = ()> + 'static)> {
    let server = Arc::new(SchedulerServer::new(store));
    rpc_http::bind(routes(server, Sessions::default()), addr)
}
