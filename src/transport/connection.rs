//! Gateway connection and event loop.
//!
//! A [`Link`] owns the single WebSocket to the gateway for one context. It
//! connects lazily, queues outbound commands while disconnected, correlates
//! responses by `requestId` and fans everything else out to a [`Router`].
//!
//! # Event Loop
//!
//! Each connection attempt runs as one *session* task that handles:
//!
//! - Incoming frames (responses, pushes, error notices)
//! - Outgoing commands from the writer channel
//! - Requeueing a frame whose transmit failed
//!
//! Sessions are numbered. A socket callback from an older session than the
//! current one is ignored, so a manual close followed by a reconnect never
//! sees events from the socket it replaced.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::dispatch::{ListenerHandle, Listeners, Router};
use crate::error::{Error, Result};
use crate::hooks::{AuthProvider, LogoutReason, Notifier, Severity};
use crate::identifiers::{DeviceId, RequestId};
use crate::protocol::{Command, Frame, codes};

use super::dedup::LogDeduper;
use super::options::LinkOptions;
use super::path::SendPath;
use super::pending::{PendingMap, PendingReply, PendingRequest};
use super::request_id::RequestIdGenerator;

// ============================================================================
// Constants
// ============================================================================

const NOTICE_RESTORED: &str = "Realtime connection restored";
const NOTICE_TOKEN_INVALID: &str = "Realtime connection failed: login expired, re-authenticating";
const NOTICE_RELOGIN_FAILED: &str = "Automatic re-login failed, please log in again";
const NOTICE_SUPERSEDED: &str = "Signed in elsewhere, please log in again";

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Lifecycle state of a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No socket, or the last one closed.
    Disconnected,
    /// A socket is being opened.
    Connecting,
    /// The socket is open and the queue has been flushed.
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

// ============================================================================
// Internal State
// ============================================================================

/// Commands for the session writer.
enum WriterCommand {
    /// Serialize and transmit a command.
    Send(Command),
    /// Close the socket.
    Close,
}

/// Mutable connection state, guarded by one lock.
struct ConnectionState {
    status: ConnectionStatus,
    /// Commands waiting for an open socket, in submission order.
    queue: VecDeque<Command>,
    /// Set by [`Link::close_manual`]; suppresses automatic reconnects.
    manual_closed: bool,
    /// The next inbound frame is the handshake verdict.
    awaiting_first_frame: bool,
    /// Writer channel of the open session.
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
    /// Pending reconnect timer.
    reconnect: Option<JoinHandle<()>>,
    /// Current session number.
    session: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            queue: VecDeque::new(),
            manual_closed: false,
            awaiting_first_frame: false,
            writer: None,
            reconnect: None,
            session: 0,
        }
    }
}

/// Handshake verdict carried by the first frame of a session.
#[derive(Clone, Copy)]
enum Handshake {
    Rejected,
    Accepted,
}

// ============================================================================
// Link
// ============================================================================

/// Connection to the gateway.
///
/// Cheap to clone; all clones share one socket, queue and pending map.
///
/// # Thread Safety
///
/// `Link` is `Send + Sync`. No internal lock is held across an `.await` or
/// while listeners run.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

pub(crate) struct LinkInner {
    options: LinkOptions,
    auth: Arc<dyn AuthProvider>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<ConnectionState>,
    pending: Mutex<PendingMap>,
    ids: Mutex<RequestIdGenerator>,
    router: Router,
    status_listeners: Listeners<ConnectionStatus>,
    dedup: LogDeduper,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.inner.options.endpoint)
            .field("status", &self.status())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Link - Public API
// ============================================================================

impl Link {
    /// Creates a disconnected link.
    ///
    /// Nothing is opened until [`connect`](Self::connect) or the first send.
    #[must_use]
    pub fn new(
        options: LinkOptions,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        // Idempotent; a provider may already be installed by the host.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let dedup = LogDeduper::new(options.dedup_capacity);
        Self {
            inner: Arc::new(LinkInner {
                options,
                auth,
                notifier,
                state: Mutex::new(ConnectionState::default()),
                pending: Mutex::new(PendingMap::default()),
                ids: Mutex::new(RequestIdGenerator::new()),
                router: Router::new(),
                status_listeners: Listeners::new(),
                dedup,
            }),
        }
    }

    /// Opens the socket if allowed.
    ///
    /// No-op when manually closed, already connecting or connected, or when
    /// no token is available.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Clears the manual-close flag and connects if disconnected.
    pub fn ensure_connected(&self) {
        self.inner.ensure_connected();
    }

    /// Closes the socket and suppresses automatic reconnects.
    ///
    /// All pending requests fail with [`Error::ConnectionClosed`]. Queued
    /// commands are kept and go out on the next connect.
    pub fn close_manual(&self) {
        self.inner.close_manual();
    }

    /// Sends a command without correlation.
    ///
    /// Queued while disconnected; triggers a connect.
    pub fn send(&self, command: Command) {
        self.inner.send(command);
    }

    /// Sends a correlated request.
    ///
    /// Assigns a fresh request id unless the command carries one that is not
    /// already in flight. The returned reply resolves with the matching
    /// frame, or fails with [`Error::RequestTimeout`],
    /// [`Error::DeviceOffline`], [`Error::Protocol`] or
    /// [`Error::ConnectionClosed`].
    pub fn send_request(&self, command: Command) -> PendingReply {
        self.inner.send_request(command)
    }

    /// Sends a command with a request id but no correlation.
    ///
    /// Keeps a preset id; generates one otherwise.
    pub fn fire_and_forget(&self, command: Command) -> RequestId {
        self.inner.fire_and_forget(command)
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Returns the number of in-flight correlated requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the number of commands waiting for a socket.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Subscribes to status transitions.
    pub fn on_status<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status_listeners.add(callback)
    }

    /// Returns the router receiving uncorrelated and observed frames.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Returns the options this link was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &LinkOptions {
        &self.inner.options
    }

    /// Feeds one inbound text frame through the receive path.
    #[cfg(test)]
    pub(crate) fn inject(&self, text: &str) {
        self.inner.handle_inbound(text);
    }

    /// Reopens the handshake window as a fresh socket would.
    #[cfg(test)]
    pub(crate) fn arm_handshake(&self) {
        self.inner.state.lock().awaiting_first_frame = true;
    }

    /// Returns `true` while the session's verdict frame is still expected.
    #[cfg(test)]
    pub(crate) fn awaiting_handshake(&self) -> bool {
        self.inner.state.lock().awaiting_first_frame
    }

    /// Returns the ids of in-flight requests.
    #[cfg(test)]
    pub(crate) fn pending_ids(&self) -> Vec<RequestId> {
        self.inner.pending.lock().keys().copied().collect()
    }
}

#[async_trait::async_trait]
impl SendPath for Link {
    async fn request(&self, command: Command) -> Result<Frame> {
        self.send_request(command).await
    }

    fn fire(&self, command: Command) -> Result<RequestId> {
        Ok(self.fire_and_forget(command))
    }

    fn router(&self) -> Router {
        self.inner.router.clone()
    }
}

// ============================================================================
// LinkInner - Lifecycle
// ============================================================================

impl LinkInner {
    fn connect(self: &Arc<Self>) {
        if self.state.lock().manual_closed {
            debug!("Connect skipped: link closed manually");
            return;
        }

        let Some(token) = self.auth.token() else {
            debug!("Connect skipped: no credential");
            return;
        };

        let url = match self.options.connect_url(&token) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Invalid gateway endpoint");
                return;
            }
        };

        let session = {
            let mut state = self.state.lock();
            if state.manual_closed || state.status != ConnectionStatus::Disconnected {
                return;
            }
            state.status = ConnectionStatus::Connecting;
            state.session += 1;
            state.session
        };

        debug!(session, "Opening gateway socket");
        self.status_listeners.emit(&ConnectionStatus::Connecting);

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_session(url, session).await });
    }

    fn ensure_connected(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.manual_closed = false;
            if state.status != ConnectionStatus::Disconnected {
                return;
            }
        }
        self.connect();
    }

    fn close_manual(&self) {
        let (writer, was) = {
            let mut state = self.state.lock();
            state.manual_closed = true;
            if let Some(timer) = state.reconnect.take() {
                timer.abort();
            }
            state.session += 1;
            state.awaiting_first_frame = false;
            let was = std::mem::replace(&mut state.status, ConnectionStatus::Disconnected);
            (state.writer.take(), was)
        };

        if let Some(writer) = writer {
            let _ = writer.send(WriterCommand::Close);
        }

        info!(previous = %was, "Link closed manually");
        if was != ConnectionStatus::Disconnected {
            self.status_listeners.emit(&ConnectionStatus::Disconnected);
        }
        self.reject_all_pending();
    }

    async fn run_session(self: Arc<Self>, url: Url, session: u64) {
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(session, error = %e, "Gateway connect failed");
                self.on_close(session, None);
                return;
            }
        };

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
        let (mut ws_write, mut ws_read) = ws_stream.split();

        if !self.on_open(session, writer_tx) {
            debug!(session, "Session superseded before open");
            let _ = ws_write.close().await;
            return;
        }

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                        Some(Ok(Message::Close(_))) => {
                            debug!(session, "Gateway closed the socket");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(session, error = %e, "Socket read error");
                            break;
                        }
                        None => {
                            debug!(session, "Socket stream ended");
                            break;
                        }
                    }
                }

                command = writer_rx.recv() => {
                    match command {
                        Some(WriterCommand::Send(command)) => {
                            let text = match serde_json::to_string(&command) {
                                Ok(text) => text,
                                Err(e) => {
                                    error!(cmd = %command.cmd, error = %e, "Dropping unserializable command");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(session, cmd = %command.cmd, error = %e, "Transmit failed; requeued");
                                self.state.lock().queue.push_front(command);
                                break;
                            }
                            trace!(session, cmd = %command.cmd, "Frame sent");
                        }

                        Some(WriterCommand::Close) | None => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        self.on_close(session, Some(writer_rx));
    }

    /// Marks the session open and flushes the queue. Returns `false` if the
    /// session was superseded.
    fn on_open(&self, session: u64, writer: mpsc::UnboundedSender<WriterCommand>) -> bool {
        let flushed = {
            let mut state = self.state.lock();
            if state.session != session || state.status != ConnectionStatus::Connecting {
                return false;
            }

            let flushed = state.queue.len();
            while let Some(command) = state.queue.pop_front() {
                // The receiver lives in this session's task; it cannot be gone yet.
                let _ = writer.send(WriterCommand::Send(command));
            }

            state.status = ConnectionStatus::Connected;
            state.awaiting_first_frame = true;
            state.writer = Some(writer);
            flushed
        };

        info!(session, flushed, "Gateway socket open");
        self.status_listeners.emit(&ConnectionStatus::Connected);
        true
    }

    fn on_close(
        self: &Arc<Self>,
        session: u64,
        writer_rx: Option<mpsc::UnboundedReceiver<WriterCommand>>,
    ) {
        let manual = {
            let mut state = self.state.lock();
            if state.session != session {
                trace!(session, current = state.session, "Ignoring close of stale session");
                return;
            }

            state.status = ConnectionStatus::Disconnected;
            state.awaiting_first_frame = false;
            state.writer = None;

            // Commands handed to the writer but never transmitted go back in line.
            if let Some(mut rx) = writer_rx {
                rx.close();
                while let Ok(command) = rx.try_recv() {
                    if let WriterCommand::Send(command) = command {
                        state.queue.push_back(command);
                    }
                }
            }

            state.manual_closed
        };

        info!(session, "Gateway socket closed");
        self.status_listeners.emit(&ConnectionStatus::Disconnected);
        self.reject_all_pending();

        if !manual {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.manual_closed || state.reconnect.is_some() {
            return;
        }

        let delay = self.options.reconnect_delay;
        let weak: Weak<Self> = Arc::downgrade(self);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().reconnect = None;
                inner.connect();
            }
        }));
    }
}

// ============================================================================
// LinkInner - Sending
// ============================================================================

impl LinkInner {
    fn send(self: &Arc<Self>, command: Command) {
        let needs_connect = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match (state.status, state.writer.as_ref()) {
                (ConnectionStatus::Connected, Some(writer)) => {
                    if let Err(mpsc::error::SendError(WriterCommand::Send(command))) =
                        writer.send(WriterCommand::Send(command))
                    {
                        // Session task is exiting; its close handler reconnects.
                        state.queue.push_front(command);
                    }
                    false
                }
                _ => {
                    trace!(cmd = %command.cmd, queued = state.queue.len() + 1, "Queued while offline");
                    state.queue.push_back(command);
                    true
                }
            }
        };

        if needs_connect {
            self.ensure_connected();
        }
    }

    fn send_request(self: &Arc<Self>, mut command: Command) -> PendingReply {
        let (tx, rx) = oneshot::channel();

        let registered = {
            let mut pending = self.pending.lock();
            let mut rid = match command.request_id {
                Some(rid) => rid,
                None => self.ids.lock().next_id(),
            };

            if pending.len() >= self.options.max_pending {
                warn!(cmd = %command.cmd, limit = self.options.max_pending, "Too many pending requests");
                Err(rid)
            } else {
                while pending.contains_key(&rid) {
                    let mut ids = self.ids.lock();
                    ids.bump();
                    rid = ids.next_id();
                }

                pending.insert(
                    rid,
                    PendingRequest {
                        reply: tx,
                        timer: self.spawn_timeout(rid),
                        cmd: command.cmd.clone(),
                        device: command.target_device(),
                        created_at: Instant::now(),
                    },
                );
                Ok(rid)
            }
        };

        match registered {
            Ok(rid) => {
                command.request_id = Some(rid);
                self.send(command);
                PendingReply::new(rid, rx)
            }
            Err(rid) => PendingReply::failed(
                rid,
                Error::transport(format!(
                    "Too many pending requests (limit {})",
                    self.options.max_pending
                )),
            ),
        }
    }

    fn fire_and_forget(self: &Arc<Self>, mut command: Command) -> RequestId {
        let rid = {
            let pending = self.pending.lock();
            let mut rid = match command.request_id {
                Some(rid) => rid,
                None => self.ids.lock().next_id(),
            };
            // A fired id must never answer an in-flight request.
            while pending.contains_key(&rid) {
                let mut ids = self.ids.lock();
                ids.bump();
                rid = ids.next_id();
            }
            rid
        };
        command.request_id = Some(rid);
        self.send(command);
        rid
    }

    fn spawn_timeout(self: &Arc<Self>, rid: RequestId) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let timeout = self.options.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(rid);
            }
        })
    }

    fn expire(&self, rid: RequestId) {
        let Some(entry) = self.pending.lock().remove(&rid) else {
            return;
        };

        if self.dedup.first_time(format!("RTO:{rid}")) {
            warn!(request_id = %rid, cmd = %entry.cmd, "Request timed out");
        }

        let timeout_ms = self.options.request_timeout.as_millis() as u64;
        let error = Error::request_timeout(rid, entry.cmd.clone(), timeout_ms);
        let _ = entry.reply.send(Err(error));
    }
}

// ============================================================================
// LinkInner - Receiving
// ============================================================================

impl LinkInner {
    fn handle_inbound(self: &Arc<Self>, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        let key = match frame.request_id {
            Some(rid) => format!("RX:{rid}"),
            None => format!("RX:{}:{:?}", frame.cmd(), frame.device()),
        };
        if self.dedup.first_time(key) {
            debug!(cmd = frame.cmd(), request_id = ?frame.request_id, code = ?frame.code, "Frame received");
        }

        if let Some(Handshake::Rejected) = self.check_handshake(&frame) {
            return;
        }

        if let Some(rid) = frame.request_id {
            self.complete(rid, &frame);
        }

        if frame.has_code(codes::DEVICE_OFFLINE)
            && let Some(device) = frame.device()
        {
            self.sweep_offline(device);
        }

        if frame.cmd() == codes::ERROR_CMD && frame.has_code(codes::SESSION_SUPERSEDED) {
            warn!("Session superseded by another login");
            self.notifier.notify(Severity::Warn, NOTICE_SUPERSEDED);
            self.auth.logout(LogoutReason::Superseded);
            self.close_manual();
            return;
        }

        self.router.dispatch(&frame);
    }

    /// Consumes the handshake verdict if this is a session's first frame.
    fn check_handshake(self: &Arc<Self>, frame: &Frame) -> Option<Handshake> {
        let verdict = {
            let mut state = self.state.lock();
            if !state.awaiting_first_frame {
                return None;
            }

            // Frames without a verdict code leave the window open.
            let verdict = if frame.has_code(codes::CREDENTIAL_INVALID) {
                Handshake::Rejected
            } else if frame.has_code(codes::SUCCESS) {
                Handshake::Accepted
            } else {
                return None;
            };
            state.awaiting_first_frame = false;
            verdict
        };

        match verdict {
            Handshake::Accepted => {
                self.notifier.notify(Severity::Info, NOTICE_RESTORED);
            }
            Handshake::Rejected => {
                warn!("Gateway rejected credential; attempting silent re-login");
                self.notifier.notify(Severity::Error, NOTICE_TOKEN_INVALID);
                self.spawn_relogin();
            }
        }
        Some(verdict)
    }

    fn spawn_relogin(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.auth.relogin().await {
                Ok(()) => {
                    info!("Silent re-login succeeded; reconnecting");
                    inner.close_manual();
                    inner.ensure_connected();
                }
                Err(e) => {
                    warn!(error = %e, "Silent re-login failed");
                    inner.notifier.notify(Severity::Error, NOTICE_RELOGIN_FAILED);
                }
            }
        });
    }

    fn complete(&self, rid: RequestId, frame: &Frame) {
        let Some(entry) = self.pending.lock().remove(&rid) else {
            trace!(request_id = %rid, "No pending request for response");
            return;
        };

        let elapsed_ms = entry.created_at.elapsed().as_millis() as u64;
        debug!(request_id = %rid, cmd = %entry.cmd, elapsed_ms, "Request completed");

        let outcome = match frame.clone().into_result() {
            Err(Error::Protocol { code, .. }) if code == codes::DEVICE_OFFLINE => {
                match entry.device {
                    Some(device) => Err(Error::device_offline(device, Some(rid))),
                    None => Err(Error::protocol(code, "device offline")),
                }
            }
            other => other,
        };
        entry.complete(outcome);
    }

    fn sweep_offline(&self, device: DeviceId) {
        let swept: Vec<(RequestId, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, entry)| entry.device == Some(device))
                .map(|(rid, _)| *rid)
                .collect();
            ids.into_iter()
                .filter_map(|rid| pending.remove(&rid).map(|entry| (rid, entry)))
                .collect()
        };

        if !swept.is_empty() {
            debug!(device = %device, count = swept.len(), "Failing requests for offline device");
        }
        for (rid, entry) in swept {
            entry.complete(Err(Error::device_offline(device, Some(rid))));
        }
    }

    fn reject_all_pending(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending requests on close");
        }
        for entry in drained {
            entry.complete(Err(Error::ConnectionClosed));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::hooks::{StaticAuth, TracingNotifier};

    /// A link with no credential: commands queue and nothing connects.
    fn offline_link(timeout: Duration) -> Link {
        let options = LinkOptions::new("ws://127.0.0.1:9/ws")
            .with_force_secure(false)
            .with_request_timeout(timeout);
        Link::new(
            options,
            Arc::new(StaticAuth::anonymous()),
            Arc::new(TracingNotifier),
        )
    }

    #[tokio::test]
    async fn test_send_request_queues_while_offline() {
        let link = offline_link(Duration::from_secs(10));
        let _reply = link.send_request(Command::new("status"));

        assert_eq!(link.status(), ConnectionStatus::Disconnected);
        assert_eq!(link.pending_count(), 1);
        assert_eq!(link.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_response_resolves_by_request_id() {
        let link = offline_link(Duration::from_secs(10));
        let reply = link.send_request(Command::new("status").device(5u64));
        let rid = reply.request_id();

        link.inject(&format!(r#"{{"cmd":"statusResponse","code":0,"requestId":{rid},"data":[1]}}"#));

        let frame = reply.await.expect("response");
        assert_eq!(frame.cmd(), "statusResponse");
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_code_rejects() {
        let link = offline_link(Duration::from_secs(10));
        let reply = link.send_request(Command::new("reboot"));
        let rid = reply.request_id();

        link.inject(&format!(r#"{{"code":3001,"msg":"busy","requestId":"{rid}"}}"#));

        match reply.await {
            Err(Error::Protocol { code, message }) => {
                assert_eq!(code, 3001);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let link = offline_link(Duration::from_millis(10_000));
        let reply = link.send_request(Command::new("status"));

        let err = reply.await.expect_err("timeout");
        assert!(err.is_timeout());
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_ignored() {
        let link = offline_link(Duration::from_millis(100));
        let reply = link.send_request(Command::new("status"));
        let rid = reply.request_id();

        assert!(reply.await.expect_err("timeout").is_timeout());
        link.inject(&format!(r#"{{"code":0,"requestId":{rid}}}"#));
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_sweeps_device_requests() {
        let link = offline_link(Duration::from_secs(10));
        let first = link.send_request(Command::new("a").device(42u64));
        let second = link.send_request(Command::new("b").device(42u64));
        let other = link.send_request(Command::new("c").device(7u64));

        link.inject(r#"{"cmd":"deviceStatus","code":2004,"to":{"type":1,"id":42}}"#);

        assert!(first.await.expect_err("offline").is_offline());
        assert!(second.await.expect_err("offline").is_offline());
        assert_eq!(link.pending_count(), 1);
        assert_eq!(link.pending_ids(), vec![other.request_id()]);
    }

    #[tokio::test]
    async fn test_correlated_offline_uses_request_device() {
        let link = offline_link(Duration::from_secs(10));
        let reply = link.send_request(Command::new("a").device(9u64));
        let rid = reply.request_id();

        link.inject(&format!(r#"{{"code":2004,"requestId":{rid}}}"#));

        match reply.await {
            Err(Error::DeviceOffline { device, request_id }) => {
                assert_eq!(device, DeviceId::new(9));
                assert_eq!(request_id, Some(rid));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uncorrelated_frames_reach_router() {
        let link = offline_link(Duration::from_secs(10));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _handle = link.router().on_cmd("alarm", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        link.inject(r#"{"cmd":"alarm","data":{"level":2}}"#);
        link.inject("not json");

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_superseded_session_logs_out() {
        let auth = Arc::new(StaticAuth::new("token"));
        let link = Link::new(
            LinkOptions::new("ws://127.0.0.1:9/ws").with_force_secure(false),
            auth.clone(),
            Arc::new(TracingNotifier),
        );
        let raw = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&raw);
        let _handle = link.router().on_raw(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        link.inject(r#"{"cmd":"error","code":1004}"#);

        assert_eq!(auth.token(), None);
        assert_eq!(raw.load(Ordering::SeqCst), 0);
        assert_eq!(link.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_supersede_with_garbage_request_id_still_logs_out() {
        let auth = Arc::new(StaticAuth::new("token"));
        let link = Link::new(
            LinkOptions::new("ws://127.0.0.1:9/ws").with_force_secure(false),
            auth.clone(),
            Arc::new(TracingNotifier),
        );

        link.inject(r#"{"cmd":"error","code":1004,"requestId":""}"#);

        assert_eq!(auth.token(), None);
    }

    #[tokio::test]
    async fn test_close_manual_rejects_pending() {
        let link = offline_link(Duration::from_secs(10));
        let reply = link.send_request(Command::new("status"));

        link.close_manual();

        assert!(matches!(reply.await, Err(Error::ConnectionClosed)));
        assert_eq!(link.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_preset_request_id_is_kept() {
        let link = offline_link(Duration::from_secs(10));
        let rid = link.fire_and_forget(Command::new("ping").with_request_id(RequestId::new(77)));
        assert_eq!(rid, RequestId::new(77));
        assert_eq!(link.pending_count(), 0);
        assert_eq!(link.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_colliding_request_id_is_replaced() {
        let link = offline_link(Duration::from_secs(10));
        let first = link.send_request(Command::new("a").with_request_id(RequestId::new(5)));
        let second = link.send_request(Command::new("b").with_request_id(RequestId::new(5)));

        assert_eq!(first.request_id(), RequestId::new(5));
        assert_ne!(second.request_id(), RequestId::new(5));
        assert_eq!(link.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let link = Link::new(
            LinkOptions::new("ws://127.0.0.1:9/ws").with_max_pending(1),
            Arc::new(StaticAuth::anonymous()),
            Arc::new(TracingNotifier),
        );
        let _first = link.send_request(Command::new("a"));
        let second = link.send_request(Command::new("b"));
        assert!(matches!(second.await, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_fired_id_never_reuses_pending_id() {
        let link = offline_link(Duration::from_secs(10));
        let reply = link.send_request(Command::new("getConfig"));
        let rid = reply.request_id();

        let fired = link.fire_and_forget(Command::new("tiltStatus").with_request_id(rid));
        assert_ne!(fired, rid);

        link.inject(&format!(r#"{{"cmd":"tiltStatusResponse","code":0,"requestId":{fired}}}"#));
        assert_eq!(link.pending_ids(), vec![rid]);

        link.inject(&format!(r#"{{"cmd":"getConfigResponse","code":0,"requestId":{rid}}}"#));
        let frame = reply.await.expect("response");
        assert_eq!(frame.cmd(), "getConfigResponse");
    }

    #[tokio::test]
    async fn test_push_before_verdict_keeps_handshake_open() {
        let link = offline_link(Duration::from_secs(10));
        let raw = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&raw);
        let _handle = link.router().on_raw(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        link.arm_handshake();

        link.inject(r#"{"cmd":"alarm","data":[1]}"#);
        assert!(link.awaiting_handshake());
        assert_eq!(raw.load(Ordering::SeqCst), 1);

        // The rejection is consumed as the verdict, not routed.
        link.inject(r#"{"cmd":"auth","code":1001}"#);
        assert!(!link.awaiting_handshake());
        assert_eq!(raw.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_verdict_closes_handshake() {
        let link = offline_link(Duration::from_secs(10));
        link.arm_handshake();

        link.inject(r#"{"code":0}"#);
        assert!(!link.awaiting_handshake());
    }
}
