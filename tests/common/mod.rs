//! In-process gateway used by the scenario suite.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use probe_link::{Notifier, Severity};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// MockGateway
// ============================================================================

/// Builds reply frames for one received command.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

enum Outbound {
    Text(String),
    Close,
}

/// A WebSocket gateway on a random localhost port.
///
/// Every connection receives `handshake` as its first frame. Each received
/// command is recorded and passed to the responder.
pub struct MockGateway {
    port: u16,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<usize>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Outbound>>>>,
}

impl MockGateway {
    /// Starts a gateway that answers nothing.
    pub async fn silent() -> Self {
        Self::start(json!({"code": 0}), Arc::new(|_| Vec::new())).await
    }

    /// Starts a gateway answering every command with `<cmd>Response`,
    /// echoing `requestId` and `to`, with `data`.
    pub async fn echo(data: Value) -> Self {
        Self::start(
            json!({"code": 0}),
            Arc::new(move |cmd| vec![response_to(cmd, data.clone())]),
        )
        .await
    }

    /// Starts a gateway with a custom handshake and responder.
    pub async fn start(handshake: Value, responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();

        let gateway = Self {
            port,
            received: Arc::default(),
            connections: Arc::default(),
            current: Arc::default(),
        };

        let received = Arc::clone(&gateway.received);
        let connections = Arc::clone(&gateway.connections);
        let current = Arc::clone(&gateway.current);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                *connections.lock() += 1;

                let (mut sink, mut stream) = ws.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
                *current.lock() = Some(tx.clone());
                let _ = tx.send(Outbound::Text(handshake.to_string()));

                tokio::spawn(async move {
                    while let Some(out) = rx.recv().await {
                        match out {
                            Outbound::Text(text) => {
                                if sink.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Outbound::Close => {
                                let _ = sink.close().await;
                                break;
                            }
                        }
                    }
                });

                let received = Arc::clone(&received);
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    while let Some(Ok(message)) = stream.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                            continue;
                        };
                        received.lock().push(value.clone());
                        for reply in responder(&value) {
                            let _ = tx.send(Outbound::Text(reply.to_string()));
                        }
                    }
                });
            }
        });

        gateway
    }

    /// Returns the `ws://` endpoint.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Returns every command received so far.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Counts received commands named `cmd`.
    pub fn count(&self, cmd: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|v| v["cmd"] == cmd)
            .count()
    }

    /// Returns the number of accepted connections.
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }

    /// Pushes a frame on the current connection.
    pub fn push(&self, frame: Value) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Outbound::Text(frame.to_string()));
        }
    }

    /// Closes the current connection from the gateway side.
    pub fn close_current(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.send(Outbound::Close);
        }
    }
}

/// Builds `<cmd>Response` for a received command.
pub fn response_to(cmd: &Value, data: Value) -> Value {
    let name = cmd["cmd"].as_str().unwrap_or_default();
    let mut reply = json!({
        "cmd": format!("{name}Response"),
        "code": 0,
        "data": data,
    });
    if let Some(rid) = cmd.get("requestId") {
        reply["requestId"] = rid.clone();
    }
    if let Some(to) = cmd.get("to") {
        reply["to"] = to.clone();
    }
    reply
}

// ============================================================================
// Helpers
// ============================================================================

/// Polls `condition` every 10ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A [`Notifier`] that records notices.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(Severity, String)> {
        self.notices.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.notices.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        self.notices.lock().push((severity, message.to_owned()));
    }
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
