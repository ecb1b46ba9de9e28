//! Cross-context proxy layer.
//!
//! Only one context (the *master*) owns the gateway socket. Other contexts
//! reach the gateway by posting [`Envelope`]s to it over a [`ContextPort`].
//!
//! # Message Flow
//!
//! ```text
//! child (ProxyClient)                      master (ProxyMaster + Link)
//!   │ ── discover{rid} ───────────────────────► │
//!   │ ◄─────────────────────── discoverAck{rid} │
//!   │ ── request{rid, payload} ───────────────► │
//!   │ ◄─────────────────────────────── ack{rid} │  (within ack timeout)
//!   │ ◄───────────────── result{rid, ok | err}  │  (after the real call)
//!   │ ── fire{payload} ───────────────────────► │  (no reply)
//!   │ ◄──────────────────── event{frame}        │  (every inbound frame)
//!   │ ◄──────────────────── status{status}      │  (link status changes)
//! ```
//!
//! An ack only proves the master is alive. Failing to get one yields
//! [`Error::ProxyUnavailable`](crate::Error::ProxyUnavailable), which callers
//! can tell apart from a device rejecting the command.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Child-side send path |
//! | `envelope` | Envelope types and ports |
//! | `master` | Master-side relay |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Submodules
// ============================================================================

/// Child-side send path.
pub mod client;

/// Envelope types and ports.
pub mod envelope;

/// Master-side relay.
pub mod master;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{DEFAULT_ACK_TIMEOUT, ProxyClient, ProxyOptions};
pub use envelope::{ContextPort, Envelope, ProxyOutcome};
pub use master::ProxyMaster;

// ============================================================================
// ContextRole
// ============================================================================

/// How a context reaches the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    /// Owns the socket and serves children.
    Master,
    /// Relays through a discovered master.
    Slave,
    /// Found no master; owns a socket of its own.
    Standalone,
}

impl ContextRole {
    /// Returns `true` if this context owns a socket.
    #[inline]
    #[must_use]
    pub fn owns_socket(self) -> bool {
        !matches!(self, Self::Slave)
    }
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Slave => f.write_str("slave"),
            Self::Standalone => f.write_str("standalone"),
        }
    }
}
