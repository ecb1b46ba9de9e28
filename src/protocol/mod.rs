//! WebSocket protocol message types.
//!
//! This module defines the JSON frames exchanged between the client and the
//! device gateway.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Local → Gateway | Request or fire-and-forget call |
//! | [`Frame`] | Gateway → Local | Response, push notification, error |
//!
//! # Status Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | absent / `0` | Success |
//! | `1001` | Credential expired or invalid |
//! | `1004` | Session superseded by another login |
//! | `2004` | Addressed device is offline |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound command frames |
//! | `frame` | Inbound frames and addresses |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command frames.
pub mod command;

/// Inbound frames and device addresses.
pub mod frame;

/// Number-or-string deserialization helpers.
pub(crate) mod lenient;

// ============================================================================
// Codes
// ============================================================================

/// Wire status codes and well-known command names.
pub mod codes {
    /// Success status.
    pub const SUCCESS: i64 = 0;

    /// Expired or invalid credential; triggers a silent re-login.
    pub const CREDENTIAL_INVALID: i64 = 1001;

    /// Session superseded elsewhere; forces logout.
    pub const SESSION_SUPERSEDED: i64 = 1004;

    /// Addressed device is offline.
    pub const DEVICE_OFFLINE: i64 = 2004;

    /// Sentinel command name for gateway error frames.
    pub const ERROR_CMD: &str = "error";

    /// Suffix the gateway appends to the command name of a response.
    pub const RESPONSE_SUFFIX: &str = "Response";

    /// Address `type` used for probe devices.
    pub const DEVICE_ADDRESS_TYPE: i64 = 1;
}

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use frame::{Address, Frame};
