//! Client facade.
//!
//! One [`Client`] per context. The master owns the gateway socket and
//! serves children; a child relays through the master, or opens its own
//! socket when none answers.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Requests, polling and events for one context |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ContextRole`] | How the context reaches the gateway |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::Client;

pub use crate::proxy::ContextRole;
