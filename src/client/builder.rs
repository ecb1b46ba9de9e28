//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use probe_link::{Client, StaticAuth};
//!
//! # async fn example() -> probe_link::Result<()> {
//! let master = Client::builder()
//!     .endpoint("wss://gateway.example.com/ws")
//!     .auth(Arc::new(StaticAuth::new("token")))
//!     .build_master()?;
//!
//! // Hand the port to the embedded context.
//! let port = master.attach_child()?;
//! let child = Client::builder().build_child(Some(port)).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hooks::{AuthProvider, Notifier, StaticAuth, TracingNotifier};
use crate::poller::PollerOptions;
use crate::proxy::{ContextPort, ContextRole, ProxyClient, ProxyMaster, ProxyOptions};
use crate::transport::{Link, LinkOptions};

use super::core::{Backend, Client};

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Gateway link options; required for socket-owning contexts.
    link: Option<LinkOptions>,
    /// Credential source; required for socket-owning contexts.
    auth: Option<Arc<dyn AuthProvider>>,
    /// Notice sink; defaults to [`TracingNotifier`].
    notifier: Option<Arc<dyn Notifier>>,
    proxy: ProxyOptions,
    poller: PollerOptions,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("link", &self.link)
            .field("has_auth", &self.auth.is_some())
            .field("has_notifier", &self.notifier.is_some())
            .field("proxy", &self.proxy)
            .field("poller", &self.poller)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gateway endpoint, keeping other link options.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - WebSocket URL (e.g., "wss://host/ws")
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.link = Some(match self.link.take() {
            Some(mut options) => {
                options.endpoint = endpoint;
                options
            }
            None => LinkOptions::new(endpoint),
        });
        self
    }

    /// Sets the link options.
    #[inline]
    #[must_use]
    pub fn link_options(mut self, options: LinkOptions) -> Self {
        self.link = Some(options);
        self
    }

    /// Sets the credential source.
    #[inline]
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Uses a fixed token with no re-login support.
    #[inline]
    #[must_use]
    pub fn token(self, token: impl Into<String>) -> Self {
        self.auth(Arc::new(StaticAuth::new(token)))
    }

    /// Sets the notice sink.
    #[inline]
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sets the proxy options used by child contexts.
    #[inline]
    #[must_use]
    pub fn proxy_options(mut self, options: ProxyOptions) -> Self {
        self.proxy = options;
        self
    }

    /// Sets the scheduler options.
    #[inline]
    #[must_use]
    pub fn poller_options(mut self, options: PollerOptions) -> Self {
        self.poller = options;
        self
    }

    /// Builds the socket-owning master context.
    ///
    /// The socket opens lazily on the first send.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint or auth provider is missing
    /// - [`Error::Config`] if link or scheduler options are invalid
    pub fn build_master(self) -> Result<Client> {
        self.poller.validate()?;
        let link = self.build_link()?;
        let notifier = self.resolved_notifier();

        Ok(Client::from_parts(
            Backend::Master(ProxyMaster::new(link)),
            notifier,
            self.poller,
        ))
    }

    /// Builds a child context.
    ///
    /// Probes `parent` for a master. Without one, the child opens its own
    /// socket, which needs an endpoint and auth provider.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if scheduler options are invalid
    /// - [`Error::Config`] if no master answered and no link is configured
    pub async fn build_child(self, parent: Option<ContextPort>) -> Result<Client> {
        self.poller.validate()?;

        let (proxy, role) = ProxyClient::discover(parent, self.proxy).await;
        let notifier = self.resolved_notifier();

        let backend = match role {
            ContextRole::Slave => Backend::Slave(proxy),
            _ => {
                warn!("No master context found; opening a dedicated connection");
                Backend::Standalone(self.build_link()?)
            }
        };

        debug!(role = %role, "Child context built");
        Ok(Client::from_parts(backend, notifier, self.poller))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn build_link(&self) -> Result<Link> {
        let options = self.link.clone().ok_or_else(|| {
            Error::config(
                "Gateway endpoint is required. Use .endpoint() to set it.\n\
                 Example: Client::builder().endpoint(\"wss://host/ws\")",
            )
        })?;
        options.validate()?;

        let auth = self.auth.clone().ok_or_else(|| {
            Error::config(
                "Auth provider is required. Use .auth() or .token() to set it.\n\
                 Example: Client::builder().token(\"...\")",
            )
        })?;

        Ok(Link::new(options, auth, self.resolved_notifier()))
    }

    fn resolved_notifier(&self) -> Arc<dyn Notifier> {
        self.notifier
            .clone()
            .unwrap_or_else(|| Arc::new(TracingNotifier))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ClientBuilder::new();
        assert!(builder.link.is_none());
        assert!(builder.auth.is_none());
        assert_eq!(builder.proxy, ProxyOptions::default());
    }

    #[test]
    fn test_endpoint_keeps_other_options() {
        let builder = ClientBuilder::new()
            .link_options(LinkOptions::new("wss://a/ws").with_request_timeout(Duration::from_secs(3)))
            .endpoint("wss://b/ws");

        let link = builder.link.expect("link options");
        assert_eq!(link.endpoint, "wss://b/ws");
        assert_eq!(link.request_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_build_master_requires_endpoint() {
        let err = ClientBuilder::new().token("t").build_master().expect_err("no endpoint");
        assert!(err.to_string().contains("endpoint"));
    }

    #[tokio::test]
    async fn test_build_master_requires_auth() {
        let err = ClientBuilder::new()
            .endpoint("wss://gateway/ws")
            .build_master()
            .expect_err("no auth");
        assert!(err.to_string().contains("Auth provider"));
    }

    #[tokio::test]
    async fn test_build_master_rejects_bad_scheme() {
        let err = ClientBuilder::new()
            .endpoint("https://gateway/ws")
            .token("t")
            .build_master()
            .expect_err("bad scheme");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_poller_options() {
        let err = ClientBuilder::new()
            .endpoint("wss://gateway/ws")
            .token("t")
            .poller_options(PollerOptions::new().with_fail_threshold(0))
            .build_master()
            .expect_err("bad threshold");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_master_with_custom_notifier() {
        let client = ClientBuilder::new()
            .endpoint("wss://gateway/ws")
            .token("t")
            .notifier(Arc::new(TracingNotifier))
            .build_master()
            .expect("master should build");
        assert_eq!(client.role(), ContextRole::Master);
    }
}
