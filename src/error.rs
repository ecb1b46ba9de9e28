//! Error types for probe-link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use probe_link::{Command, Result};
//!
//! async fn example(client: &probe_link::Client) -> Result<()> {
//!     let frame = client.request(Command::new("getHostDeviceInfo").device(42)).await?;
//!     println!("{:?}", frame.data);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Transport`], [`Error::ConnectionClosed`], [`Error::WebSocket`] |
//! | Timeout | [`Error::RequestTimeout`] |
//! | Device | [`Error::DeviceOffline`] |
//! | Protocol | [`Error::Protocol`], [`Error::Remote`] |
//! | Proxy | [`Error::ProxyUnavailable`] |
//! | Credential | [`Error::Credential`] |
//! | External | [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{DeviceId, RequestId};
use crate::protocol::codes;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Normalized Codes
// ============================================================================

/// Code used in [`ErrorShape`] for failures without a server status code.
pub const GENERIC_FAILURE_CODE: i64 = -1;

/// Code used in [`ErrorShape`] when no proxy master acknowledged a call.
pub const PROXY_UNAVAILABLE_CODE: i64 = -100;

// ============================================================================
// ProxyUnavailableReason
// ============================================================================

/// Why a proxied call could not reach a master context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyUnavailableReason {
    /// The request envelope could not be posted (parent port closed).
    NotPosted,
    /// This context has no parent to post to.
    NoParent,
    /// A parent exists but never acknowledged within the ack timeout.
    NoAck,
}

impl fmt::Display for ProxyUnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotPosted => "NOT_POSTED",
            Self::NoParent => "NO_PARENT",
            Self::NoAck => "NO_ACK",
        };
        f.write_str(s)
    }
}

// ============================================================================
// ErrorShape
// ============================================================================

/// Normalized `{code, msg}` error shape handed across context boundaries.
///
/// UI layers render this directly, so every error converts into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Server status code, or a negative local code.
    pub code: i64,
    /// Human-readable message.
    pub msg: String,
}

impl ErrorShape {
    /// Creates a new error shape.
    #[inline]
    #[must_use]
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client or link configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Socket-level open or send failure.
    ///
    /// Triggers a reconnect when raised by the link itself.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Connection closed while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No correlated response arrived before the request deadline.
    #[error("Request {request_id} ({cmd}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Command name of the request.
        cmd: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The addressed device is offline (status code 2004).
    #[error("Device {device} is offline")]
    DeviceOffline {
        /// Offline device.
        device: DeviceId,
        /// Request rejected by the offline status, if known.
        request_id: Option<RequestId>,
    },

    /// Non-zero application status code in an otherwise valid response.
    #[error("Protocol error {code}: {message}")]
    Protocol {
        /// Application status code.
        code: i64,
        /// Server message, or a generated description.
        message: String,
    },

    /// Failure relayed from another context without richer typing.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Normalized code.
        code: i64,
        /// Normalized message.
        message: String,
    },

    // ========================================================================
    // Proxy Errors
    // ========================================================================
    /// No master context answered the acknowledgement probe.
    #[error("Proxy unavailable: {reason}")]
    ProxyUnavailable {
        /// Classified reason.
        reason: ProxyUnavailableReason,
    },

    // ========================================================================
    // Credential Errors
    // ========================================================================
    /// Expired or invalid credential that could not be recovered.
    #[error("Credential error: {message}")]
    Credential {
        /// Description of the credential failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, cmd: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            cmd: cmd.into(),
            timeout_ms,
        }
    }

    /// Creates a device offline error.
    #[inline]
    pub fn device_offline(device: DeviceId, request_id: Option<RequestId>) -> Self {
        Self::DeviceOffline { device, request_id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Creates a proxy unavailable error.
    #[inline]
    pub fn proxy_unavailable(reason: ProxyUnavailableReason) -> Self {
        Self::ProxyUnavailable { reason }
    }

    /// Creates a credential error.
    #[inline]
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Shape Conversion
// ============================================================================

impl Error {
    /// Normalizes this error into a `{code, msg}` shape.
    #[must_use]
    pub fn shape(&self) -> ErrorShape {
        match self {
            Self::DeviceOffline { .. } => ErrorShape::new(codes::DEVICE_OFFLINE, "device offline"),
            Self::Protocol { code, message } | Self::Remote { code, message } => {
                ErrorShape::new(*code, message.clone())
            }
            Self::ProxyUnavailable { reason } => {
                ErrorShape::new(PROXY_UNAVAILABLE_CODE, format!("proxy ack timeout ({reason})"))
            }
            Self::Credential { message } => {
                ErrorShape::new(codes::CREDENTIAL_INVALID, message.clone())
            }
            other => ErrorShape::new(GENERIC_FAILURE_CODE, other.to_string()),
        }
    }

    /// Rebuilds an error from a shape relayed by another context.
    ///
    /// `device` is the target of the original call, used for offline errors.
    #[must_use]
    pub fn from_shape(shape: ErrorShape, device: Option<DeviceId>) -> Self {
        match (shape.code, device) {
            (codes::DEVICE_OFFLINE, Some(device)) => Self::device_offline(device, None),
            (code, _) if code > 0 => Self::protocol(code, shape.msg),
            (code, _) => Self::Remote {
                code,
                message: shape.msg,
            },
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the addressed device was reported offline.
    #[inline]
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::DeviceOffline { .. })
    }

    /// Returns `true` if no shared connection was reachable through a proxy.
    #[inline]
    #[must_use]
    pub fn is_proxy_unavailable(&self) -> bool {
        matches!(self, Self::ProxyUnavailable { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::Transport { .. } | Self::ConnectionClosed
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
