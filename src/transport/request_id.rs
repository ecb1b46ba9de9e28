//! Request id generation.
//!
//! Ids are built from three parts so that separate contexts can generate
//! them without a shared counter:
//!
//! ```text
//! rid = (now_ms - EPOCH) * 16384 + seq * 256 + instance
//!       └── high: clock ──┘   └── mid ──┘  └── low: random tag ──┘
//! ```
//!
//! `seq` counts ids issued within one millisecond and wraps at 63,
//! borrowing the next millisecond. The result sorts roughly by creation
//! time and stays below 2^53 for centuries after the epoch.

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Clock epoch for ids: 2025-01-01T00:00:00Z in Unix milliseconds.
pub const RID_EPOCH_MS: u64 = 1_735_689_600_000;

/// Largest intra-millisecond sequence value before wrapping.
const SEQ_MAX: u64 = 63;

/// Multiplier for the millisecond component.
const MS_FACTOR: u64 = 16_384;

/// Multiplier for the sequence component.
const SEQ_FACTOR: u64 = 256;

// ============================================================================
// RequestIdGenerator
// ============================================================================

/// Generates practically unique, roughly chronological request ids.
#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    /// Last millisecond component used.
    last_ms: u64,
    /// Sequence within `last_ms`.
    seq: u64,
    /// Random per-instance tag.
    instance: u8,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    /// Creates a generator with a random instance tag.
    #[must_use]
    pub fn new() -> Self {
        Self::with_instance(Uuid::new_v4().as_bytes()[0])
    }

    /// Creates a generator with a fixed instance tag.
    #[inline]
    #[must_use]
    pub const fn with_instance(instance: u8) -> Self {
        Self {
            last_ms: 0,
            seq: 0,
            instance,
        }
    }

    /// Returns this generator's instance tag.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> u8 {
        self.instance
    }

    /// Generates the next id from the system clock.
    pub fn next_id(&mut self) -> RequestId {
        self.next_at(now_ms())
    }

    /// Generates the next id as if the clock read `now_ms`.
    ///
    /// A clock that moves backwards never produces a smaller id.
    pub fn next_at(&mut self, now_ms: u64) -> RequestId {
        let ms = now_ms.max(self.last_ms);
        if ms == self.last_ms {
            self.advance_seq();
        } else {
            self.last_ms = ms;
            self.seq = 0;
        }
        self.compose()
    }

    /// Skips one sequence slot.
    ///
    /// Used to step past an id that collides with one still in use.
    pub fn bump(&mut self) {
        self.advance_seq();
    }

    fn advance_seq(&mut self) {
        self.seq += 1;
        if self.seq > SEQ_MAX {
            self.last_ms += 1;
            self.seq = 0;
        }
    }

    fn compose(&self) -> RequestId {
        let diff = self.last_ms.saturating_sub(RID_EPOCH_MS);
        RequestId::new(diff * MS_FACTOR + self.seq * SEQ_FACTOR + u64::from(self.instance))
    }
}

/// Current Unix time in milliseconds.
#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

    #[test]
    fn test_layout() {
        let mut generator = RequestIdGenerator::with_instance(7);
        let id = generator.next_at(RID_EPOCH_MS + 10);
        assert_eq!(id.as_u64(), 10 * 16_384 + 7);

        let id = generator.next_at(RID_EPOCH_MS + 10);
        assert_eq!(id.as_u64(), 10 * 16_384 + 256 + 7);
    }

    #[test]
    fn test_seq_wrap_borrows_next_ms() {
        let mut generator = RequestIdGenerator::with_instance(0);
        let base = RID_EPOCH_MS + 100;
        for _ in 0..=SEQ_MAX {
            generator.next_at(base);
        }
        let wrapped = generator.next_at(base);
        assert_eq!(wrapped.as_u64(), 101 * 16_384);
    }

    #[test]
    fn test_bump_skips_slot() {
        let mut generator = RequestIdGenerator::with_instance(1);
        let first = generator.next_at(RID_EPOCH_MS + 5);
        generator.bump();
        let second = generator.next_at(RID_EPOCH_MS + 5);
        assert_eq!(second.as_u64() - first.as_u64(), 2 * 256);
    }

    #[test]
    fn test_system_clock_within_safe_range() {
        let mut generator = RequestIdGenerator::new();
        let id = generator.next_id();
        assert!(id.as_u64() <= MAX_SAFE_INTEGER);
        assert_eq!(id.as_u64() % 256, u64::from(generator.instance()));
    }

    proptest! {
        #[test]
        fn prop_ids_strictly_increase(offsets in proptest::collection::vec(0u64..10_000, 1..300)) {
            let mut generator = RequestIdGenerator::with_instance(200);
            let mut previous = None;
            for offset in offsets {
                let id = generator.next_at(RID_EPOCH_MS + offset);
                if let Some(prev) = previous {
                    prop_assert!(id > prev);
                }
                previous = Some(id);
            }
        }

        #[test]
        fn prop_instance_tag_preserved(instance in any::<u8>(), offset in 0u64..1_000_000_000) {
            let mut generator = RequestIdGenerator::with_instance(instance);
            let id = generator.next_at(RID_EPOCH_MS + offset);
            prop_assert_eq!(id.as_u64() % 256, u64::from(instance));
            prop_assert!(id.as_u64() <= MAX_SAFE_INTEGER);
        }
    }
}
