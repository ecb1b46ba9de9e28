//! Adaptive polling scheduler.
//!
//! Most probe telemetry has no push channel, so the client re-requests it
//! on a schedule. The [`Poller`] keeps one entry per (command, device),
//! shared by all subscribers, and pauses entries whose device stops
//! answering.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use probe_link::hooks::TracingNotifier;
//! use probe_link::poller::{Poller, PollerOptions};
//! use probe_link::transport::SendPath;
//!
//! # fn example(path: Arc<dyn SendPath>) {
//! let poller = Poller::new(path, Arc::new(TracingNotifier), PollerOptions::default());
//! let sub = poller.subscribe("tiltStatus", 42u64, Duration::from_secs(1));
//!
//! let _handle = poller.on_suspend(|event| {
//!     eprintln!("{} paused on {}: {}", event.cmd, event.device, event.reason);
//! });
//!
//! sub.unsubscribe();
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `entry` | Per-entry state and keys |
//! | `events` | Lifecycle events |
//! | `options` | Scheduler options |
//! | `scheduler` | The scheduler |

// ============================================================================
// Submodules
// ============================================================================

/// Per-entry state and keys.
pub mod entry;

/// Lifecycle events.
pub mod events;

/// Scheduler options.
pub mod options;

/// The scheduler.
pub mod scheduler;

// ============================================================================
// Re-exports
// ============================================================================

pub use entry::{PollKey, PollSnapshot, PollStrategy};
pub use events::{ResumeEvent, SendEvent, SuccessEvent, SuspendEvent, SuspendReason};
pub use options::PollerOptions;
pub use scheduler::{PollRequest, PollSubscription, Poller};
