//! Probe Link - Control-plane client for remote probe fleets.
//!
//! This library talks to a fleet of tilt, displacement, audio and video
//! probes through one device gateway over a single WebSocket.
//!
//! # Architecture
//!
//! The client follows a shared-socket model:
//!
//! - **Master context**: Owns the [`Link`] to the gateway and serves children
//! - **Child contexts**: Reach the gateway through the master's link via
//!   [`proxy`] envelopes, or open their own socket when no master answers
//!
//! Key design principles:
//!
//! - One physical socket per master; requests are correlated by `requestId`
//! - Every context sees the same inbound frames through its [`Router`]
//! - Telemetry without a push channel is re-requested by the [`Poller`]
//! - Unresponsive or offline devices are suspended, never hammered
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use probe_link::{Client, Command, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .endpoint("wss://gateway.example.com/ws")
//!         .token("secret")
//!         .build_master()?;
//!
//!     // Poll tilt status on device 42 every second
//!     let _sub = client.subscribe("tiltStatus", 42u64, Duration::from_secs(1));
//!     let _handle = client.on_suspend(|event| {
//!         eprintln!("{} paused: {}", event.device, event.reason);
//!     });
//!
//!     // One-off request
//!     let frame = client.request(Command::new("getConfig").device(42u64)).await?;
//!     println!("{:?}", frame.data);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] facade and [`ClientBuilder`] |
//! | [`dispatch`] | Frame router and typed listener sets |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hooks`] | Auth and notification collaborators |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`poller`] | Adaptive polling scheduler |
//! | [`protocol`] | Wire frame types |
//! | [`proxy`] | Cross-context proxy layer |
//! | [`transport`] | Gateway connection |

// ============================================================================
// Modules
// ============================================================================

/// Client facade.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Frame router and typed listener sets.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Collaborator interfaces for auth and user notices.
pub mod hooks;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing request ids with device ids.
pub mod identifiers;

/// Adaptive polling scheduler.
pub mod poller;

/// Wire frame types.
pub mod protocol;

/// Cross-context proxy layer.
pub mod proxy;

/// Gateway connection, correlation and reconnection.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ContextRole};

// Dispatch types
pub use dispatch::{ListenerHandle, Router};

// Error types
pub use error::{Error, ErrorShape, ProxyUnavailableReason, Result};

// Collaborators
pub use hooks::{AuthProvider, LogoutReason, Notifier, Severity, StaticAuth, TracingNotifier};

// Identifier types
pub use identifiers::{CorrelationId, DeviceId, RequestId};

// Poller types
pub use poller::{
    PollRequest, PollSnapshot, PollStrategy, PollSubscription, Poller, PollerOptions, SuspendEvent,
    SuspendReason,
};

// Protocol types
pub use protocol::{Address, Command, Frame};

// Proxy types
pub use proxy::{ContextPort, ProxyClient, ProxyMaster, ProxyOptions};

// Transport types
pub use transport::{ConnectionStatus, Link, LinkOptions, PendingReply, SendPath};
