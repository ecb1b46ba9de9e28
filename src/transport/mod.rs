//! Gateway transport layer.
//!
//! This module owns the WebSocket to the device gateway and the request
//! bookkeeping around it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Link (Rust)    │          WebSocket           │  Gateway        │
//! │                 │◄────────────────────────────►│                 │
//! │  queue          │   wss://host/ws?token=...    │  probes         │
//! │  pending map    │                              │  (by device id) │
//! │  Router         │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Link::new` - Create disconnected
//! 2. `Link::send*` or `Link::connect` - Open socket with the current token
//! 3. First frame - `1001` triggers silent re-login, `0` confirms the session
//! 4. Unexpected close - Pending requests fail, reconnect after a delay
//! 5. `Link::close_manual` - Close and stay closed until the next send
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Socket lifecycle, correlation and inbound routing |
//! | `dedup` | Bounded log de-duplication |
//! | `options` | Connection options |
//! | `path` | Send path trait shared with the proxy client |
//! | `pending` | In-flight request bookkeeping |
//! | `request_id` | Request id generation |

// ============================================================================
// Submodules
// ============================================================================

/// Socket lifecycle, correlation and inbound routing.
pub mod connection;

/// Bounded log de-duplication.
pub mod dedup;

/// Connection options.
pub mod options;

/// Send path trait.
pub mod path;

/// In-flight request bookkeeping.
pub mod pending;

/// Request id generation.
pub mod request_id;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionStatus, Link};
pub use dedup::LogDeduper;
pub use options::LinkOptions;
pub use path::SendPath;
pub use pending::PendingReply;
pub use request_id::RequestIdGenerator;
