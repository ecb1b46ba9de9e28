//! Bounded de-duplication of diagnostic log lines.
//!
//! Owned by a [`Link`](super::Link) so repeated timeout or receive lines for
//! the same key are logged once per link.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Remembers recently seen keys, evicting the oldest beyond `capacity`.
#[derive(Debug)]
pub struct LogDeduper {
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    keys: FxHashSet<String>,
    order: VecDeque<String>,
}

impl LogDeduper {
    /// Creates a deduper remembering at most `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Returns `true` the first time `key` is seen.
    pub fn first_time(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        let mut seen = self.seen.lock();
        if seen.keys.contains(&key) {
            return false;
        }
        if seen.order.len() >= self.capacity
            && let Some(oldest) = seen.order.pop_front()
        {
            seen.keys.remove(&oldest);
        }
        seen.order.push_back(key.clone());
        seen.keys.insert(key);
        true
    }

    /// Returns the number of remembered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().order.len()
    }

    /// Returns `true` if nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_time_only_once() {
        let dedup = LogDeduper::new(8);
        assert!(dedup.first_time("RTO:1"));
        assert!(!dedup.first_time("RTO:1"));
        assert!(dedup.first_time("RTO:2"));
    }

    #[test]
    fn test_eviction() {
        let dedup = LogDeduper::new(2);
        assert!(dedup.first_time("a"));
        assert!(dedup.first_time("b"));
        assert!(dedup.first_time("c"));
        assert_eq!(dedup.len(), 2);
        // "a" was evicted
        assert!(dedup.first_time("a"));
        assert!(!dedup.first_time("c"));
    }
}
