//! Scheduler options.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Consecutive failures after which an entry is suspended.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 5;

/// Interval used by shifting entries whose last response was empty.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(2_000);

/// Interval used when a subscription does not name one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(600);

/// In-flight timeout as a multiple of the interval.
pub const DEFAULT_GRACE_FACTOR: f64 = 1.6;

/// Tick lateness, as a multiple of the interval, taken as host throttling.
pub const DEFAULT_THROTTLE_DRIFT_FACTOR: f64 = 2.5;

/// Timeout multiplier while throttled.
pub const DEFAULT_THROTTLE_MULTIPLIER: f64 = 2.0;

/// Maximum remembered request ids for offline lookups.
pub const DEFAULT_RID_INDEX_CAPACITY: usize = 5_000;

/// Commands eligible for active/idle interval shifting.
pub const DEFAULT_SIMPLE_COMMANDS: [&str; 3] = ["diponechannel", "diptwochannel", "audioonechannel"];

// ============================================================================
// PollerOptions
// ============================================================================

/// Options for a [`Poller`](super::Poller).
#[derive(Debug, Clone, PartialEq)]
pub struct PollerOptions {
    /// Consecutive failures before suspension.
    pub fail_threshold: u32,
    /// Interval for shifting entries without data.
    pub idle_interval: Duration,
    /// Interval used by [`Poller::subscribe_default`](super::Poller::subscribe_default).
    pub default_interval: Duration,
    /// In-flight timeout factor.
    pub grace_factor: f64,
    /// Drift factor that marks a tick as throttled.
    pub throttle_drift_factor: f64,
    /// Timeout multiplier while throttled.
    pub throttle_multiplier: f64,
    /// Lower-cased commands using the shifting strategy.
    pub simple_commands: FxHashSet<String>,
    /// Capacity of the request id index.
    pub rid_index_capacity: usize,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            default_interval: DEFAULT_POLL_INTERVAL,
            grace_factor: DEFAULT_GRACE_FACTOR,
            throttle_drift_factor: DEFAULT_THROTTLE_DRIFT_FACTOR,
            throttle_multiplier: DEFAULT_THROTTLE_MULTIPLIER,
            simple_commands: DEFAULT_SIMPLE_COMMANDS
                .iter()
                .map(|cmd| (*cmd).to_owned())
                .collect(),
            rid_index_capacity: DEFAULT_RID_INDEX_CAPACITY,
        }
    }
}

impl PollerOptions {
    /// Creates default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[inline]
    #[must_use]
    pub fn with_fail_threshold(mut self, threshold: u32) -> Self {
        self.fail_threshold = threshold;
        self
    }

    /// Sets the idle interval.
    #[inline]
    #[must_use]
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Sets the default interval.
    #[inline]
    #[must_use]
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Sets the grace factor.
    #[inline]
    #[must_use]
    pub fn with_grace_factor(mut self, factor: f64) -> Self {
        self.grace_factor = factor;
        self
    }

    /// Sets the throttle detection factor and timeout multiplier.
    #[inline]
    #[must_use]
    pub fn with_throttle(mut self, drift_factor: f64, multiplier: f64) -> Self {
        self.throttle_drift_factor = drift_factor;
        self.throttle_multiplier = multiplier;
        self
    }

    /// Adds a command to the shifting set.
    #[inline]
    #[must_use]
    pub fn with_simple_command(mut self, cmd: impl AsRef<str>) -> Self {
        self.simple_commands
            .insert(cmd.as_ref().trim().to_lowercase());
        self
    }

    /// Replaces the shifting set.
    #[must_use]
    pub fn with_simple_commands<I, S>(mut self, cmds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.simple_commands = cmds
            .into_iter()
            .map(|cmd| cmd.as_ref().trim().to_lowercase())
            .collect();
        self
    }

    /// Sets the request id index capacity.
    #[inline]
    #[must_use]
    pub fn with_rid_index_capacity(mut self, capacity: usize) -> Self {
        self.rid_index_capacity = capacity;
        self
    }

    /// Returns `true` if `cmd` uses the shifting strategy.
    #[must_use]
    pub fn is_simple(&self, cmd: &str) -> bool {
        self.simple_commands.contains(&cmd.trim().to_lowercase())
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero threshold or idle interval, or a
    /// non-positive factor.
    pub fn validate(&self) -> Result<()> {
        if self.fail_threshold == 0 {
            return Err(Error::config("fail_threshold must be at least 1"));
        }
        if self.idle_interval.is_zero() || self.default_interval.is_zero() {
            return Err(Error::config("Poll intervals must be greater than zero"));
        }
        for (name, value) in [
            ("grace_factor", self.grace_factor),
            ("throttle_drift_factor", self.throttle_drift_factor),
            ("throttle_multiplier", self.throttle_multiplier),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(format!("{name} must be a positive number")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PollerOptions::default();
        assert_eq!(options.fail_threshold, 5);
        assert_eq!(options.idle_interval, Duration::from_millis(2_000));
        assert!(options.is_simple(" dipOneChannel "));
        assert!(options.is_simple("audioOneChannel"));
        assert!(!options.is_simple("tiltStatus"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_custom_simple_set() {
        let options = PollerOptions::new().with_simple_commands(["VideoFrame"]);
        assert!(options.is_simple("videoframe"));
        assert!(!options.is_simple("dipOneChannel"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PollerOptions::new().with_fail_threshold(0).validate().is_err());
        assert!(PollerOptions::new().with_grace_factor(f64::NAN).validate().is_err());
        assert!(
            PollerOptions::new()
                .with_idle_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
