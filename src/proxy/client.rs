//! Child side: relays requests through a master context.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::dispatch::{ListenerHandle, Listeners, Router};
use crate::error::{Error, ProxyUnavailableReason, Result};
use crate::identifiers::{CorrelationId, DeviceId, RequestId};
use crate::protocol::{Command, Frame};
use crate::transport::{ConnectionStatus, RequestIdGenerator, SendPath};

use super::ContextRole;
use super::envelope::{ContextPort, Envelope, ProxyOutcome};

// ============================================================================
// Constants
// ============================================================================

/// Default liveness deadline for master acknowledgements.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(300);

// ============================================================================
// ProxyOptions
// ============================================================================

/// Options for a [`ProxyClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Deadline for `ack` and `discoverAck`. `None` waits indefinitely.
    pub ack_timeout: Option<Duration>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
        }
    }
}

impl ProxyOptions {
    /// Creates default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the acknowledgement deadline.
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

// ============================================================================
// ProxyChannel
// ============================================================================

/// One outstanding proxied call.
struct ProxyChannel {
    reply: oneshot::Sender<Result<Frame>>,
    ack_timer: Option<JoinHandle<()>>,
    acknowledged: bool,
    device: Option<DeviceId>,
}

// ============================================================================
// ProxyClient
// ============================================================================

/// Send path for a context that does not own the socket.
///
/// Requests are posted to the master as envelopes. The master must
/// acknowledge each within the ack deadline; after that the call waits for
/// the relayed result with no deadline of its own.
#[derive(Clone)]
pub struct ProxyClient {
    inner: Arc<ProxyClientInner>,
}

struct ProxyClientInner {
    parent: Option<mpsc::UnboundedSender<Envelope>>,
    options: ProxyOptions,
    channels: Mutex<FxHashMap<CorrelationId, ProxyChannel>>,
    ids: Mutex<RequestIdGenerator>,
    router: Router,
    status: Mutex<ConnectionStatus>,
    status_listeners: Listeners<ConnectionStatus>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClient")
            .field("has_parent", &self.has_parent())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Drop for ProxyClientInner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

// ============================================================================
// ProxyClient - Construction
// ============================================================================

impl ProxyClient {
    /// Probes `parent` for a master.
    ///
    /// Returns [`ContextRole::Slave`] with a connected client when the
    /// master answers within the ack deadline, and
    /// [`ContextRole::Standalone`] with a parentless client otherwise.
    pub async fn discover(parent: Option<ContextPort>, options: ProxyOptions) -> (Self, ContextRole) {
        let Some(port) = parent else {
            debug!("No parent context; running standalone");
            return (Self::detached(options), ContextRole::Standalone);
        };

        let (tx, mut rx) = port.split();
        let rid = CorrelationId::generate();
        if tx.send(Envelope::Discover { rid: rid.clone() }).is_err() {
            debug!("Parent port closed; running standalone");
            return (Self::detached(options), ContextRole::Standalone);
        }

        let mut early = Vec::new();
        let wait = async {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::DiscoverAck { rid: got } if got == rid => return true,
                    other => early.push(other),
                }
            }
            false
        };
        let acked = match options.ack_timeout {
            Some(deadline) => tokio::time::timeout(deadline, wait).await.unwrap_or(false),
            None => wait.await,
        };

        if !acked {
            debug!("No master acknowledged discovery; running standalone");
            return (Self::detached(options), ContextRole::Standalone);
        }

        let client = Self::with_parent(Some(tx), options);
        for envelope in early {
            client.inner.handle(envelope);
        }

        let reader = tokio::spawn(read_loop(Arc::downgrade(&client.inner), rx));
        *client.inner.reader.lock() = Some(reader);

        debug!("Master discovered; relaying through parent");
        (client, ContextRole::Slave)
    }

    /// Creates a client with no parent; every call fails with
    /// [`ProxyUnavailableReason::NoParent`].
    #[must_use]
    pub fn detached(options: ProxyOptions) -> Self {
        Self::with_parent(None, options)
    }

    fn with_parent(parent: Option<mpsc::UnboundedSender<Envelope>>, options: ProxyOptions) -> Self {
        Self {
            inner: Arc::new(ProxyClientInner {
                parent,
                options,
                channels: Mutex::new(FxHashMap::default()),
                ids: Mutex::new(RequestIdGenerator::new()),
                router: Router::new(),
                status: Mutex::new(ConnectionStatus::Disconnected),
                status_listeners: Listeners::new(),
                reader: Mutex::new(None),
            }),
        }
    }
}

// ============================================================================
// ProxyClient - Public API
// ============================================================================

impl ProxyClient {
    /// Sends a correlated request through the master.
    ///
    /// # Errors
    ///
    /// - [`Error::ProxyUnavailable`] with `NoParent`, `NotPosted` or `NoAck`
    /// - Any error the master's link produced, rebuilt from its shape
    pub async fn request(&self, command: Command) -> Result<Frame> {
        ProxyClientInner::request(&self.inner, command).await
    }

    /// Sends a command through the master without reply.
    ///
    /// Keeps a preset request id; generates one from this context's own
    /// generator otherwise.
    ///
    /// # Errors
    ///
    /// [`Error::ProxyUnavailable`] with `NoParent` or `NotPosted`.
    pub fn fire(&self, mut command: Command) -> Result<RequestId> {
        let Some(parent) = &self.inner.parent else {
            return Err(Error::proxy_unavailable(ProxyUnavailableReason::NoParent));
        };

        let rid = match command.request_id {
            Some(rid) => rid,
            None => self.inner.ids.lock().next_id(),
        };
        command.request_id = Some(rid);

        parent
            .send(Envelope::Fire { payload: command })
            .map_err(|_| Error::proxy_unavailable(ProxyUnavailableReason::NotPosted))?;
        trace!(request_id = %rid, "Fire posted to master");
        Ok(rid)
    }

    /// Returns `true` if a master was discovered.
    #[inline]
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.inner.parent.is_some()
    }

    /// Returns the number of proxied calls awaiting an outcome.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Returns the master link's last relayed status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock()
    }

    /// Subscribes to relayed status changes.
    pub fn on_status<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status_listeners.add(callback)
    }

    /// Returns the router receiving frames relayed from the master.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }
}

#[async_trait]
impl SendPath for ProxyClient {
    async fn request(&self, command: Command) -> Result<Frame> {
        ProxyClient::request(self, command).await
    }

    fn fire(&self, command: Command) -> Result<RequestId> {
        ProxyClient::fire(self, command)
    }

    fn router(&self) -> Router {
        self.inner.router.clone()
    }
}

// ============================================================================
// ProxyClientInner
// ============================================================================

impl ProxyClientInner {
    async fn request(self: &Arc<Self>, command: Command) -> Result<Frame> {
        let Some(parent) = &self.parent else {
            return Err(Error::proxy_unavailable(ProxyUnavailableReason::NoParent));
        };

        let rid = CorrelationId::generate();
        let (tx, rx) = oneshot::channel();
        self.channels.lock().insert(
            rid.clone(),
            ProxyChannel {
                reply: tx,
                ack_timer: None,
                acknowledged: false,
                device: command.target_device(),
            },
        );

        let cmd = command.cmd.clone();
        if parent
            .send(Envelope::Request {
                rid: rid.clone(),
                payload: command,
            })
            .is_err()
        {
            self.channels.lock().remove(&rid);
            return Err(Error::proxy_unavailable(ProxyUnavailableReason::NotPosted));
        }
        trace!(rid = %rid, cmd = %cmd, "Request posted to master");

        if let Some(deadline) = self.options.ack_timeout {
            let timer = self.spawn_ack_timer(rid.clone(), deadline);
            let mut channels = self.channels.lock();
            match channels.get_mut(&rid) {
                Some(channel) if !channel.acknowledged => channel.ack_timer = Some(timer),
                _ => timer.abort(),
            }
        }

        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    fn spawn_ack_timer(self: &Arc<Self>, rid: CorrelationId, deadline: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_ack(&rid);
            }
        })
    }

    fn expire_ack(&self, rid: &CorrelationId) {
        let channel = {
            let mut channels = self.channels.lock();
            match channels.get(rid) {
                Some(channel) if !channel.acknowledged => channels.remove(rid),
                _ => None,
            }
        };

        if let Some(channel) = channel {
            warn!(rid = %rid, "Master did not acknowledge proxied request");
            let _ = channel
                .reply
                .send(Err(Error::proxy_unavailable(ProxyUnavailableReason::NoAck)));
        }
    }

    fn handle(&self, envelope: Envelope) {
        match envelope {
            Envelope::Ack { rid } => {
                let timer = {
                    let mut channels = self.channels.lock();
                    channels.get_mut(&rid).and_then(|channel| {
                        channel.acknowledged = true;
                        channel.ack_timer.take()
                    })
                };
                if let Some(timer) = timer {
                    timer.abort();
                }
            }

            Envelope::Result { rid, outcome } => {
                let Some(channel) = self.channels.lock().remove(&rid) else {
                    debug!(rid = %rid, "Ignoring result for unknown or expired proxy call");
                    return;
                };
                if let Some(timer) = channel.ack_timer {
                    timer.abort();
                }

                let result = match outcome {
                    ProxyOutcome::Ok(frame) => Ok(frame),
                    ProxyOutcome::Err(shape) => Err(Error::from_shape(shape, channel.device)),
                };
                let _ = channel.reply.send(result);
            }

            Envelope::Event { frame } => self.router.dispatch(&frame),

            Envelope::Status { status } => {
                *self.status.lock() = status;
                self.status_listeners.emit(&status);
            }

            Envelope::DiscoverAck { .. } => {}

            other => {
                debug!(envelope = ?other, "Ignoring unexpected envelope from master");
            }
        }
    }

    fn parent_closed(&self) {
        debug!("Master port closed");

        let channels: Vec<ProxyChannel> = self.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            if let Some(timer) = channel.ack_timer {
                timer.abort();
            }
            let _ = channel.reply.send(Err(Error::ConnectionClosed));
        }

        let changed = {
            let mut status = self.status.lock();
            std::mem::replace(&mut *status, ConnectionStatus::Disconnected)
                != ConnectionStatus::Disconnected
        };
        if changed {
            self.status_listeners.emit(&ConnectionStatus::Disconnected);
        }
    }
}

/// Feeds envelopes from the master into the client.
async fn read_loop(client: Weak<ProxyClientInner>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let Some(inner) = client.upgrade() else {
            return;
        };
        inner.handle(envelope);
    }

    if let Some(inner) = client.upgrade() {
        inner.parent_closed();
    }
}

// ============================================================================
// Tests
// ============================================================================
