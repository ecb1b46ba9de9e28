//! Per-(command, device) polling state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::identifiers::{DeviceId, RequestId};

// ============================================================================
// PollStrategy
// ============================================================================

/// How an entry schedules and counts failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PollStrategy {
    /// Fire every interval, counting each send as a failure until a
    /// response clears it. The interval shifts between active and idle by
    /// whether the last response carried data.
    Shifting,
    /// One tracked request at a time; a failure is counted only when the
    /// in-flight request outlives its drift-aware timeout.
    Fixed,
}

impl fmt::Display for PollStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shifting => f.write_str("shifting"),
            Self::Fixed => f.write_str("fixed"),
        }
    }
}

// ============================================================================
// PollKey
// ============================================================================

/// Entry key: lower-cased, trimmed command plus device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    cmd: String,
    device: DeviceId,
}

impl PollKey {
    /// Creates a key, normalizing the command.
    #[must_use]
    pub fn new(cmd: &str, device: DeviceId) -> Self {
        Self {
            cmd: cmd.trim().to_lowercase(),
            device,
        }
    }

    /// Returns the normalized command.
    #[inline]
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Returns the device.
    #[inline]
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cmd, self.device)
    }
}

// ============================================================================
// InFlight
// ============================================================================

/// The tracked request of a [`PollStrategy::Fixed`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub(crate) request_id: RequestId,
    pub(crate) started_at: Instant,
    pub(crate) timed_out: bool,
}

// ============================================================================
// PollEntry
// ============================================================================

/// Scheduling state for one (command, device) pair.
#[derive(Debug)]
pub(crate) struct PollEntry {
    /// Command as first subscribed (trimmed, original casing).
    pub(crate) cmd: String,
    pub(crate) device: DeviceId,
    pub(crate) data: Option<Value>,
    pub(crate) strategy: PollStrategy,
    pub(crate) ref_count: u32,

    pub(crate) base_active_interval: Duration,
    pub(crate) active_interval: Duration,
    pub(crate) idle_interval: Duration,
    pub(crate) interval: Duration,
    pub(crate) has_data: bool,

    pub(crate) failures: u32,
    pub(crate) suspended: bool,
    pub(crate) offline: bool,

    pub(crate) last_send_at: Option<Instant>,
    pub(crate) last_response_at: Option<Instant>,
    pub(crate) next_due: Option<Instant>,

    pub(crate) in_flight: Option<InFlight>,
    pub(crate) last_request_rid: Option<RequestId>,
    pub(crate) last_response_rid: Option<RequestId>,

    pub(crate) timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is replaced; a wake-up with an older epoch
    /// is ignored.
    pub(crate) epoch: u64,
}

impl PollEntry {
    pub(crate) fn new(
        cmd: String,
        device: DeviceId,
        data: Option<Value>,
        strategy: PollStrategy,
        interval: Duration,
        idle_interval: Duration,
    ) -> Self {
        let mut entry = Self {
            cmd,
            device,
            data,
            strategy,
            ref_count: 0,
            base_active_interval: interval,
            active_interval: interval,
            idle_interval,
            interval,
            has_data: false,
            failures: 0,
            suspended: false,
            offline: false,
            last_send_at: None,
            last_response_at: None,
            next_due: None,
            in_flight: None,
            last_request_rid: None,
            last_response_rid: None,
            timer: None,
            epoch: 0,
        };
        entry.interval = entry.target_interval();
        entry
    }

    /// Interval implied by strategy and data state.
    pub(crate) fn target_interval(&self) -> Duration {
        match self.strategy {
            PollStrategy::Shifting if !self.has_data => self.idle_interval,
            _ => self.active_interval,
        }
    }

    /// Cancels the pending timer, if any, and invalidates its wake-up.
    pub(crate) fn cancel_timer(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub(crate) fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            cmd: self.cmd.clone(),
            device: self.device,
            strategy: self.strategy,
            ref_count: self.ref_count,
            interval: self.interval,
            active_interval: self.active_interval,
            base_active_interval: self.base_active_interval,
            idle_interval: self.idle_interval,
            has_data: self.has_data,
            failures: self.failures,
            suspended: self.suspended,
            offline: self.offline,
            in_flight: self.in_flight.map(|f| f.request_id),
            last_request_rid: self.last_request_rid,
            last_response_rid: self.last_response_rid,
            since_last_send: self.last_send_at.map(|at| at.elapsed()),
            since_last_response: self.last_response_at.map(|at| at.elapsed()),
        }
    }
}

impl Drop for PollEntry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

// ============================================================================
// PollSnapshot
// ============================================================================

/// Read-only view of an entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub cmd: String,
    pub device: DeviceId,
    pub strategy: PollStrategy,
    pub ref_count: u32,
    /// Interval currently in effect.
    pub interval: Duration,
    pub active_interval: Duration,
    pub base_active_interval: Duration,
    pub idle_interval: Duration,
    pub has_data: bool,
    /// Consecutive failures.
    pub failures: u32,
    pub suspended: bool,
    pub offline: bool,
    /// Request id of the tracked request ([`PollStrategy::Fixed`] only).
    pub in_flight: Option<RequestId>,
    pub last_request_rid: Option<RequestId>,
    pub last_response_rid: Option<RequestId>,
    pub since_last_send: Option<Duration>,
    pub since_last_response: Option<Duration>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(strategy: PollStrategy) -> PollEntry {
        PollEntry::new(
            "dipOneChannel".into(),
            DeviceId::new(42),
            None,
            strategy,
            Duration::from_millis(600),
            Duration::from_millis(2_000),
        )
    }

    #[test]
    fn test_key_normalizes() {
        let key = PollKey::new("  DipOneChannel ", DeviceId::new(42));
        assert_eq!(key.cmd(), "diponechannel");
        assert_eq!(key.to_string(), "diponechannel:42");
        assert_eq!(key, PollKey::new("diponechannel", DeviceId::new(42)));
    }

    #[test]
    fn test_shifting_starts_idle() {
        let mut e = entry(PollStrategy::Shifting);
        assert_eq!(e.interval, Duration::from_millis(2_000));
        e.has_data = true;
        assert_eq!(e.target_interval(), Duration::from_millis(600));
    }

    #[test]
    fn test_fixed_uses_active_interval() {
        let e = entry(PollStrategy::Fixed);
        assert_eq!(e.interval, Duration::from_millis(600));
    }

    #[test]
    fn test_cancel_timer_bumps_epoch() {
        let mut e = entry(PollStrategy::Fixed);
        let before = e.epoch;
        e.cancel_timer();
        assert_ne!(e.epoch, before);
        assert!(e.timer.is_none());
    }
}
