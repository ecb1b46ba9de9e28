//! Connection options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use probe_link::LinkOptions;
//!
//! let options = LinkOptions::new("wss://gateway.example.com/ws")
//!     .with_request_timeout(Duration::from_secs(5))
//!     .with_reconnect_delay(Duration::from_secs(2));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for correlated requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default delay before reconnecting after an unexpected close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(4_000);

/// Default maximum number of in-flight correlated requests.
pub const DEFAULT_MAX_PENDING: usize = 1_024;

/// Default number of remembered log keys.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4_096;

/// Query parameter carrying the auth token.
const TOKEN_QUERY_KEY: &str = "token";

// ============================================================================
// LinkOptions
// ============================================================================

/// Options for a [`Link`](super::Link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Gateway WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,

    /// Upgrade `ws://` endpoints to `wss://`.
    pub force_secure: bool,

    /// Deadline for correlated requests.
    pub request_timeout: Duration,

    /// Delay before reconnecting after an unexpected close.
    pub reconnect_delay: Duration,

    /// Maximum number of in-flight correlated requests.
    pub max_pending: usize,

    /// Capacity of the diagnostic log de-duplicator.
    pub dedup_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            force_secure: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_pending: DEFAULT_MAX_PENDING,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkOptions {
    /// Creates options for `endpoint` with default settings.
    #[inline]
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Sets the request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enables or disables the `ws://` → `wss://` upgrade.
    #[inline]
    #[must_use]
    pub fn with_force_secure(mut self, force: bool) -> Self {
        self.force_secure = force;
        self
    }

    /// Sets the in-flight request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the log de-duplicator capacity.
    #[inline]
    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LinkOptions {
    /// Checks that the options describe a usable endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is empty or not a WebSocket URL
    /// - [`Error::Config`] if the request timeout or pending limit is zero
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::config(
                "Gateway endpoint is required. Use LinkOptions::new(\"wss://host/ws\")",
            ));
        }

        let url = Url::parse(self.endpoint.trim())?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Endpoint must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config("Request timeout must be greater than zero"));
        }

        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be greater than zero"));
        }

        Ok(())
    }

    /// Builds the connection URL carrying `token` as a query credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the endpoint does not parse.
    pub fn connect_url(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(self.endpoint.trim())?;

        if self.force_secure && url.scheme() == "ws" && url.set_scheme("wss").is_err() {
            return Err(Error::config("Cannot upgrade endpoint to wss://"));
        }

        url.query_pairs_mut().append_pair(TOKEN_QUERY_KEY, token);
        Ok(url)
    }
}

// ============================================================================
// Tests
// ============================================================================
