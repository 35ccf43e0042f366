//! Request/response pairing over a [`Transport`].
//!
//! Each call gets a fresh numeric id and a single-use result slot in the
//! pending table. A background dispatcher drains the transport's inbound
//! channel and completes slots by id. An entry leaves the table exactly
//! once: on its response, on its deadline, on a send failure, or when the
//! transport closes. Whatever removes it decides the outcome, so a late
//! or duplicated response finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::message::{Message, Notification, RequestId, Response};
use super::transport::{Inbound, Transport};
use crate::error::{McpError, Result};

const NOTIFICATION_CAPACITY: usize = 64;

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Debug, Clone)]
enum Shutdown {
    /// [`Correlator::close`] was called.
    Local,
    /// The peer went away.
    Peer(String),
}

impl Shutdown {
    fn error(&self) -> McpError {
        match self {
            Self::Local => McpError::Closed,
            Self::Peer(reason) => McpError::ProcessTerminated(reason.clone()),
        }
    }
}

#[derive(Default)]
struct Table {
    calls: HashMap<u64, PendingCall>,
    shutdown: Option<Shutdown>,
}

struct Shared {
    table: Mutex<Table>,
    notifications: broadcast::Sender<Notification>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self, id: u64) -> Option<PendingCall> {
        self.table().calls.remove(&id)
    }

    fn resolve(&self, response: Response) {
        let Some(id) = response.id.as_ref().and_then(numeric_id) else {
            match response.outcome {
                Err(error) => warn!(code = error.code, message = %error.message, "Unattributed error from server"),
                Ok(_) => debug!(id = ?response.id, "Dropping response with foreign id"),
            }
            return;
        };

        match self.take(id) {
            Some(call) => {
                debug!(id, method = %call.method, "Response matched");
                let _ = call.tx.send(response.outcome.map_err(McpError::from));
            }
            None => debug!(id, "Dropping response with no pending call"),
        }
    }

    /// Fail every pending call and refuse new ones. The first shutdown
    /// reason sticks.
    fn shut(&self, shutdown: Shutdown) {
        let (calls, shutdown) = {
            let mut table = self.table();
            let shutdown = table.shutdown.get_or_insert(shutdown).clone();
            (std::mem::take(&mut table.calls), shutdown)
        };
        if !calls.is_empty() {
            debug!(pending = calls.len(), reason = ?shutdown, "Failing pending calls");
        }
        for (_, call) in calls {
            let _ = call.tx.send(Err(shutdown.error()));
        }
    }
}

fn numeric_id(id: &RequestId) -> Option<u64> {
    match id {
        RequestId::Number(n) => Some(*n),
        // Some servers echo ids back as strings.
        RequestId::String(s) => s.parse().ok(),
    }
}

async fn dispatch(shared: Arc<Shared>, mut inbound: mpsc::Receiver<Inbound>, label: String) {
    while let Some(item) = inbound.recv().await {
        match item {
            Inbound::Message(Message::Response(response)) => shared.resolve(response),
            Inbound::Message(Message::Notification(notification)) => {
                debug!(transport = %label, method = %notification.method, "Server notification");
                let _ = shared.notifications.send(notification);
            }
            Inbound::Message(Message::Request(request)) => {
                debug!(transport = %label, method = %request.method, "Ignoring server-initiated request");
            }
            Inbound::Closed(reason) => {
                debug!(transport = %label, %reason, "Transport closed");
                shared.shut(Shutdown::Peer(reason));
                return;
            }
        }
    }
    shared.shut(Shutdown::Peer("transport dropped".to_string()));
}

/// Multiplexes concurrent calls over one transport.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl Correlator {
    /// Take over `inbound`, the receiving side handed out with `transport`.
    pub fn new(transport: Arc<dyn Transport>, inbound: mpsc::Receiver<Inbound>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(Shared {
            table: Mutex::new(Table::default()),
            notifications,
        });
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&shared),
            inbound,
            transport.describe(),
        ));
        Self {
            transport,
            shared,
            next_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `method` and wait up to `timeout` for its response. The
    /// deadline covers the send as well as the wait.
    #[instrument(skip(self, params), fields(transport = %self.transport.describe()))]
    pub async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.shared.table();
            if let Some(shutdown) = &table.shutdown {
                return Err(shutdown.error());
            }
            table.calls.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        let request = Message::request(RequestId::Number(id), method, params);
        let exchange = async {
            self.transport.send(request).await?;
            rx.await.map_err(|_| McpError::Closed)?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.shared.take(id);
                Err(e)
            }
            Err(_) => {
                self.shared.take(id);
                debug!(id, method, "Call timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget message without an id.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let shutdown = self.shared.table().shutdown.clone();
        if let Some(shutdown) = shutdown {
            return Err(shutdown.error());
        }
        self.transport
            .send(Message::notification(method, params))
            .await
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.shared.table().calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.table().shutdown.is_some()
    }

    /// Fail outstanding calls with [`McpError::Closed`] and close the
    /// transport.
    pub async fn close(&self) -> Result<()> {
        self.shared.shut(Shutdown::Local);
        self.transport.close().await
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-memory transport: sent messages show up on `outbox`, replies are
    /// pushed through the inbound sender.
    pub(crate) struct MockTransport {
        outbox: mpsc::UnboundedSender<Message>,
    }

    impl MockTransport {
        pub(crate) fn new(outbox: mpsc::UnboundedSender<Message>) -> Self {
            Self { outbox }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, message: Message) -> Result<()> {
            self.outbox
                .send(message)
                .map_err(|_| McpError::Transport("outbox gone".into()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }

    pub(crate) fn mock() -> (
        Correlator,
        mpsc::UnboundedReceiver<Message>,
        mpsc::Sender<Inbound>,
    ) {
        let (outbox, sent) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let correlator = Correlator::new(Arc::new(MockTransport::new(outbox)), inbound_rx);
        (correlator, sent, inbound_tx)
    }

    fn request_id(message: &Message) -> RequestId {
        message.id().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (correlator, mut sent, inbound) = mock();
        let responder = tokio::spawn(async move {
            for _ in 0..2 {
                let message = sent.recv().await.unwrap();
                let id = request_id(&message);
                let echo = json!({ "id": id.to_string() });
                inbound
                    .send(Inbound::Message(Message::response(id, echo)))
                    .await
                    .unwrap();
            }
        });

        let timeout = Duration::from_secs(5);
        let first = correlator.call("ping", None, timeout).await.unwrap();
        let second = correlator.call("ping", None, timeout).await.unwrap();
        assert_eq!(first["id"], "1");
        assert_eq!(second["id"], "2");
        responder.await.unwrap();
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_rpc_error_becomes_typed_error() {
        let (correlator, mut sent, inbound) = mock();
        tokio::spawn(async move {
            let message = sent.recv().await.unwrap();
            let error = crate::mcp::message::RpcError::new(-32601, "no such method");
            inbound
                .send(Inbound::Message(Message::error_response(
                    Some(request_id(&message)),
                    error,
                )))
                .await
                .unwrap();
        });

        let err = correlator
            .call("bogus", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_string_ids_are_accepted() {
        let (correlator, mut sent, inbound) = mock();
        tokio::spawn(async move {
            let message = sent.recv().await.unwrap();
            let id = RequestId::String(request_id(&message).to_string());
            inbound
                .send(Inbound::Message(Message::response(id, json!("ok"))))
                .await
                .unwrap();
        });
        let value = correlator
            .call("ping", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_notifications_reach_subscribers() {
        let (correlator, _sent, inbound) = mock();
        let mut notes = correlator.subscribe_notifications();
        inbound
            .send(Inbound::Message(Message::notification(
                "notifications/tools/list_changed",
                None,
            )))
            .await
            .unwrap();
        let note = notes.recv().await.unwrap();
        assert_eq!(note.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_local_close_rejects_new_calls() {
        let (correlator, _sent, _inbound) = mock();
        correlator.close().await.unwrap();
        assert!(correlator.is_closed());
        assert!(matches!(
            correlator.call("ping", None, Duration::from_secs(1)).await,
            Err(McpError::Closed)
        ));
        assert!(matches!(
            correlator.notify("ping", None).await,
            Err(McpError::Closed)
        ));
    }
}
