//! Inbound dispatch and typed event registration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `listeners` | Typed listener sets with explicit unsubscribe handles |
//! | `router` | Fan-out of inbound frames by command name |

// ============================================================================
// Submodules
// ============================================================================

/// Typed listener sets.
pub mod listeners;

/// Inbound frame router.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use listeners::{ListenerHandle, Listeners};
pub use router::Router;
