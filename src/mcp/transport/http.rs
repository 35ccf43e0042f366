//! One POST per message against a list of candidate endpoints.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{INBOUND_CAPACITY, Inbound, Transport};
use crate::error::{McpError, Result};
use crate::mcp::message::{Message, PROTOCOL_HEADER, PROTOCOL_VERSION, SESSION_HEADER};
use crate::mcp::sse;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub struct HttpTransport {
    client: reqwest::Client,
    urls: Vec<String>,
    session_id: RwLock<Option<String>>,
    tx: mpsc::Sender<Inbound>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// `urls` are tried in order on every send. `timeout` bounds each POST.
    pub fn new<I, S>(urls: I, timeout: Duration) -> Result<(Self, mpsc::Receiver<Inbound>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(McpError::Transport("no endpoint URLs configured".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::Transport(format!("HTTP client: {}", e)))?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        Ok((
            Self {
                client,
                urls,
                session_id: RwLock::new(None),
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn current_session(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember_session(&self, id: &str) {
        let mut slot = self
            .session_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_deref() != Some(id) {
            info!(session = id, "Captured HTTP session id");
            *slot = Some(id.to_string());
        }
    }

    /// One attempt against one endpoint. `Ok(None)` means an accepted
    /// message with no reply body.
    async fn post(&self, url: &str, body: &[u8]) -> std::result::Result<Option<Message>, String> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_BOTH)
            .header(PROTOCOL_HEADER, PROTOCOL_VERSION)
            .body(body.to_vec());
        if let Some(id) = self.current_session() {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            self.remember_session(id);
        }

        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let text = response.text().await.map_err(|e| e.to_string())?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value = if event_stream {
            sse::parse_event_stream(&text)
        } else {
            serde_json::from_str(&text).map_err(McpError::from)
        }
        .map_err(|e| e.to_string())?;
        Message::from_value(value).map(Some).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, message), fields(method = message.method().unwrap_or("response")))]
    async fn send(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Closed);
        }
        let body = serde_json::to_vec(&message)?;

        let mut failures = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            match self.post(url, &body).await {
                Ok(reply) => {
                    if let Some(reply) = reply {
                        self.tx
                            .send(Inbound::Message(reply))
                            .await
                            .map_err(|_| McpError::Closed)?;
                    }
                    return Ok(());
                }
                Err(cause) => {
                    debug!(url, %cause, "Endpoint failed; trying next");
                    failures.push(format!("{}: {}", url, cause));
                }
            }
        }

        warn!(attempts = failures.len(), "All HTTP endpoints failed");
        Err(McpError::AllEndpointsFailed {
            endpoints: failures,
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Best effort: tell the server the session is over.
        if let Some(id) = self.current_session() {
            for url in &self.urls {
                let sent = self
                    .client
                    .delete(url)
                    .header(SESSION_HEADER, &id)
                    .timeout(Duration::from_secs(2))
                    .send()
                    .await;
                match sent {
                    Ok(response) if response.status().is_success() => break,
                    Ok(response) => {
                        debug!(url, status = %response.status(), "Session delete refused")
                    }
                    Err(e) => debug!(url, error = %e, "Session delete failed"),
                }
            }
        }

        let _ = self
            .tx
            .send(Inbound::Closed("transport closed".to_string()))
            .await;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("http:{}", self.urls.join(","))
    }

    fn session_token(&self) -> Option<String> {
        self.current_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_normalized() {
        let (transport, _rx) = HttpTransport::new(
            ["http://a:8000/mcp/", "  ", "http://b:8000/"],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(transport.urls(), ["http://a:8000/mcp", "http://b:8000"]);
        assert_eq!(transport.describe(), "http:http://a:8000/mcp,http://b:8000");
    }

    #[test]
    fn test_no_urls_is_an_error() {
        let urls: [&str; 0] = [];
        assert!(HttpTransport::new(urls, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (transport, mut rx) =
            HttpTransport::new(["http://127.0.0.1:9"], Duration::from_millis(200)).unwrap();
        transport.close().await.unwrap();
        assert!(matches!(rx.recv().await, Some(Inbound::Closed(_))));
        assert!(matches!(
            transport.send(Message::notification("ping", None)).await,
            Err(McpError::Closed)
        ));
    }
}
