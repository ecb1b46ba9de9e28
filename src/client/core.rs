//! Client facade over the send path and the scheduler.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use probe_link::{Client, Command, Result, StaticAuth};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder()
//!     .endpoint("wss://gateway.example.com/ws")
//!     .auth(Arc::new(StaticAuth::new("token")))
//!     .build_master()?;
//!
//! let _sub = client.subscribe("tiltStatus", 42u64, Duration::from_secs(1));
//! let frame = client.request(Command::new("getConfig").device(42u64)).await?;
//! println!("{:?}", frame.data);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::dispatch::{ListenerHandle, Router};
use crate::error::{Error, Result};
use crate::hooks::Notifier;
use crate::identifiers::{DeviceId, RequestId};
use crate::poller::{
    PollRequest, PollSnapshot, PollSubscription, Poller, PollerOptions, ResumeEvent, SendEvent,
    SuccessEvent, SuspendEvent,
};
use crate::protocol::{Command, Frame};
use crate::proxy::{ContextPort, ContextRole, ProxyClient, ProxyMaster};
use crate::transport::{ConnectionStatus, Link, SendPath};

use super::builder::ClientBuilder;

// ============================================================================
// Backend
// ============================================================================

/// What this context sends through.
pub(crate) enum Backend {
    /// Owns the link and serves children.
    Master(ProxyMaster),
    /// Relays through a master.
    Slave(ProxyClient),
    /// Owns a link, serves nobody.
    Standalone(Link),
}

impl Backend {
    fn role(&self) -> ContextRole {
        match self {
            Self::Master(_) => ContextRole::Master,
            Self::Slave(_) => ContextRole::Slave,
            Self::Standalone(_) => ContextRole::Standalone,
        }
    }

    fn link(&self) -> Option<&Link> {
        match self {
            Self::Master(master) => Some(master.link()),
            Self::Standalone(link) => Some(link),
            Self::Slave(_) => None,
        }
    }

    fn path(&self) -> Arc<dyn SendPath> {
        match self {
            Self::Master(master) => Arc::new(master.link().clone()),
            Self::Standalone(link) => Arc::new(link.clone()),
            Self::Slave(proxy) => Arc::new(proxy.clone()),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Entry point for one context.
///
/// Combines the context's send path (owned link or proxy) with a
/// [`Poller`]. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    backend: Backend,
    path: Arc<dyn SendPath>,
    poller: Poller,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("role", &self.role())
            .field("status", &self.status())
            .field("poller", &self.inner.poller)
            .finish()
    }
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(backend: Backend, notifier: Arc<dyn Notifier>, options: PollerOptions) -> Self {
        let path = backend.path();
        let poller = Poller::new(Arc::clone(&path), notifier, options);
        info!(role = %backend.role(), "Client ready");
        Self {
            inner: Arc::new(ClientInner {
                backend,
                path,
                poller,
            }),
        }
    }
}

// ============================================================================
// Client - Requests
// ============================================================================

impl Client {
    /// Sends a correlated request and waits for its outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::DeviceOffline`] for code 2004
    /// - [`Error::Protocol`] for other non-zero codes
    /// - [`Error::ConnectionClosed`] if the socket closes first
    /// - [`Error::ProxyUnavailable`] if a proxied call gets no acknowledgement
    pub async fn request(&self, command: Command) -> Result<Frame> {
        self.inner.path.request(command).await
    }

    /// Sends without waiting for a response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProxyUnavailable`] if a proxied command cannot be
    /// posted.
    pub fn fire_and_forget(&self, command: Command) -> Result<RequestId> {
        self.inner.path.fire(command)
    }
}

// ============================================================================
// Client - Polling
// ============================================================================

impl Client {
    /// Polls `cmd` on `device` every `interval`.
    pub fn subscribe(
        &self,
        cmd: impl Into<String>,
        device: impl Into<DeviceId>,
        interval: Duration,
    ) -> PollSubscription {
        self.inner.poller.subscribe(cmd, device, interval)
    }

    /// Polls with full parameters.
    pub fn subscribe_with(&self, request: PollRequest) -> PollSubscription {
        self.inner.poller.subscribe_with(request)
    }

    /// Releases one reference to a polling entry.
    pub fn unsubscribe(&self, cmd: &str, device: impl Into<DeviceId>) {
        self.inner.poller.unsubscribe(cmd, device);
    }

    /// Polls an entry once, now.
    pub fn force_once(&self, cmd: &str, device: impl Into<DeviceId>) {
        self.inner.poller.force_once(cmd, device);
    }

    /// Resumes a suspended entry.
    pub fn resume(&self, cmd: &str, device: impl Into<DeviceId>, immediate: bool) {
        self.inner.poller.resume(cmd, device, immediate);
    }

    /// Suspends an entry.
    pub fn suspend(&self, cmd: &str, device: impl Into<DeviceId>) {
        self.inner.poller.suspend(cmd, device);
    }

    /// Changes an entry's active interval.
    pub fn update_interval(&self, cmd: &str, device: impl Into<DeviceId>, interval: Duration) {
        self.inner.poller.update_interval(cmd, device, interval);
    }

    /// Returns a diagnostic view of an entry.
    #[must_use]
    pub fn snapshot(&self, cmd: &str, device: impl Into<DeviceId>) -> Option<PollSnapshot> {
        self.inner.poller.snapshot(cmd, device)
    }

    /// Returns the scheduler.
    #[inline]
    #[must_use]
    pub fn poller(&self) -> &Poller {
        &self.inner.poller
    }
}

// ============================================================================
// Client - Events
// ============================================================================

impl Client {
    /// Subscribes to connection status changes.
    ///
    /// In a slave context these are the master's link transitions.
    pub fn on_status<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        match &self.inner.backend {
            Backend::Master(master) => master.link().on_status(callback),
            Backend::Standalone(link) => link.on_status(callback),
            Backend::Slave(proxy) => proxy.on_status(callback),
        }
    }

    /// Subscribes to entry suspensions.
    pub fn on_suspend<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SuspendEvent) + Send + Sync + 'static,
    {
        self.inner.poller.on_suspend(callback)
    }

    /// Subscribes to entry resumptions.
    pub fn on_resume<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ResumeEvent) + Send + Sync + 'static,
    {
        self.inner.poller.on_resume(callback)
    }

    /// Subscribes to accepted poll responses.
    pub fn on_success<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SuccessEvent) + Send + Sync + 'static,
    {
        self.inner.poller.on_success(callback)
    }

    /// Subscribes to poll sends.
    pub fn on_send<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&SendEvent) + Send + Sync + 'static,
    {
        self.inner.poller.on_send(callback)
    }

    /// Subscribes to inbound frames with the exact command `cmd`.
    pub fn on_cmd<F>(&self, cmd: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.router().on_cmd(cmd, callback)
    }

    /// Subscribes to every inbound frame.
    pub fn on_raw<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.router().on_raw(callback)
    }

    /// Returns the router for inbound frames.
    #[must_use]
    pub fn router(&self) -> Router {
        self.inner.path.router()
    }
}

// ============================================================================
// Client - Context
// ============================================================================

impl Client {
    /// Returns how this context reaches the gateway.
    #[inline]
    #[must_use]
    pub fn role(&self) -> ContextRole {
        self.inner.backend.role()
    }

    /// Returns the current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match &self.inner.backend {
            Backend::Master(master) => master.link().status(),
            Backend::Standalone(link) => link.status(),
            Backend::Slave(proxy) => proxy.status(),
        }
    }

    /// Returns the owned link, if this context owns one.
    #[inline]
    #[must_use]
    pub fn link(&self) -> Option<&Link> {
        self.inner.backend.link()
    }

    /// Attaches a child context.
    ///
    /// Hand the returned port to the child, which passes it to
    /// [`ClientBuilder::build_child`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] unless this context is the master.
    pub fn attach_child(&self) -> Result<ContextPort> {
        match &self.inner.backend {
            Backend::Master(master) => Ok(master.attach()),
            _ => Err(Error::config(format!(
                "Only the master context can attach children; this context is {}",
                self.role()
            ))),
        }
    }

    /// Stops all polling and closes an owned socket.
    ///
    /// The client stays usable for one-off requests; a send reopens the
    /// socket.
    pub fn shutdown(&self) {
        self.inner.poller.dispose_all();
        if let Some(link) = self.inner.backend.link() {
            link.close_manual();
        }
        info!(role = %self.role(), "Client shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hooks::{StaticAuth, TracingNotifier};
    use crate::proxy::ProxyOptions;
    use crate::transport::LinkOptions;

    fn master() -> Client {
        Client::builder()
            .link_options(LinkOptions::new("ws://127.0.0.1:9/ws").with_force_secure(false))
            .auth(Arc::new(StaticAuth::anonymous()))
            .notifier(Arc::new(TracingNotifier))
            .build_master()
            .expect("master")
    }

    #[tokio::test]
    async fn test_master_role_and_attach() {
        let client = master();
        assert_eq!(client.role(), ContextRole::Master);
        assert!(client.link().is_some());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.attach_child().is_ok());
    }

    #[tokio::test]
    async fn test_child_of_master_is_slave() {
        let parent = master();
        let port = parent.attach_child().expect("port");

        let child = Client::builder()
            .proxy_options(ProxyOptions::new().with_ack_timeout(Some(Duration::from_secs(2))))
            .build_child(Some(port))
            .await
            .expect("child");

        assert_eq!(child.role(), ContextRole::Slave);
        assert!(child.link().is_none());
        assert!(child.attach_child().is_err());
    }

    #[tokio::test]
    async fn test_child_without_master_needs_endpoint() {
        let err = Client::builder()
            .build_child(None)
            .await
            .expect_err("no endpoint");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_child_without_master_runs_standalone() {
        let child = Client::builder()
            .link_options(LinkOptions::new("ws://127.0.0.1:9/ws"))
            .auth(Arc::new(StaticAuth::anonymous()))
            .build_child(None)
            .await
            .expect("standalone");

        assert_eq!(child.role(), ContextRole::Standalone);
        assert!(child.link().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_poller() {
        let client = Client::builder()
            .link_options(LinkOptions::new("ws://127.0.0.1:9/ws"))
            .auth(Arc::new(StaticAuth::anonymous()))
            .poller_options(PollerOptions::new().with_fail_threshold(3))
            .build_master()
            .expect("master");

        let _sub = client.subscribe("tiltStatus", 1u64, Duration::from_secs(1));
        assert_eq!(client.poller().len(), 1);

        client.shutdown();
        assert!(client.poller().is_empty());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_on_cmd_sees_link_frames() {
        let client = master();
        let seen = Arc::new(parking_lot::Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let _h = client.on_cmd("alarmPush", move |_| *sink.lock() += 1);

        let frame = Frame::parse(r#"{"cmd":"alarmPush","to":{"id":1}}"#).expect("frame");
        client.router().dispatch(&frame);
        assert_eq!(*seen.lock(), 1);
    }
}
