//! Collaborator interfaces consumed by the core.
//!
//! Token storage, login flows and user notifications live outside this
//! crate. The link and the poller reach them only through these traits.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

// ============================================================================
// Severity
// ============================================================================

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something degraded but recoverable.
    Warn,
    /// Something failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// LogoutReason
// ============================================================================

/// Why the core asked the auth layer to log out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogoutReason {
    /// The session was superseded by a login elsewhere (code 1004).
    Superseded,
    /// The credential is invalid and could not be recovered.
    CredentialRejected,
}

// ============================================================================
// AuthProvider
// ============================================================================

/// Access to the current credential.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the current token, if logged in.
    fn token(&self) -> Option<String>;

    /// Silently re-authenticates with cached credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] when no cached credential exists or
    /// the login is rejected.
    async fn relogin(&self) -> Result<()>;

    /// Invalidates the local credential and logs the user out.
    fn logout(&self, reason: LogoutReason);
}

// ============================================================================
// Notifier
// ============================================================================

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    /// Shows `message` with the given severity.
    fn notify(&self, severity: Severity, message: &str);
}

// ============================================================================
// StaticAuth
// ============================================================================

/// An [`AuthProvider`] holding a fixed token with no cached login.
///
/// `relogin` always fails; `logout` clears the token.
#[derive(Debug, Default)]
pub struct StaticAuth {
    token: RwLock<Option<String>>,
}

impl StaticAuth {
    /// Creates a provider returning `token`.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Creates a provider with no token.
    #[inline]
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn relogin(&self) -> Result<()> {
        Err(Error::credential("no cached credential"))
    }

    fn logout(&self, reason: LogoutReason) {
        info!(?reason, "Clearing static token");
        *self.token.write() = None;
    }
}

// ============================================================================
// TracingNotifier
// ============================================================================

/// A [`Notifier`] that writes notices to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(notice = message),
            Severity::Warn => warn!(notice = message),
            Severity::Error => error!(notice = message),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_auth() {
        let auth = StaticAuth::new("abc");
        assert_eq!(auth.token().as_deref(), Some("abc"));
        assert!(matches!(auth.relogin().await, Err(Error::Credential { .. })));

        auth.logout(LogoutReason::Superseded);
        assert_eq!(auth.token(), None);
    }

    #[test]
    fn test_anonymous() {
        assert_eq!(StaticAuth::anonymous().token(), None);
    }
}
