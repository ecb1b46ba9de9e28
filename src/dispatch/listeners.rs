//! Typed publish/subscribe listener sets.
//!
//! Every registration returns a [`ListenerHandle`]; calling
//! [`ListenerHandle::unsubscribe`] removes the callback.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

// ============================================================================
// Types
// ============================================================================

/// Listener callback type.
type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registered callbacks in registration order.
struct ListenerSet<E> {
    next_id: u64,
    entries: Vec<(u64, Callback<E>)>,
}

// ============================================================================
// Listeners
// ============================================================================

/// A set of callbacks for one event type.
///
/// Cloning shares the same set. Emission works on a snapshot, so callbacks
/// may register or unregister listeners (including themselves) re-entrantly.
pub struct Listeners<E> {
    inner: Arc<Mutex<ListenerSet<E>>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<E: 'static> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

impl<E: 'static> Listeners<E> {
    /// Creates an empty listener set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback.
    pub fn add<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut set = self.inner.lock();
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<ListenerSet<E>>> = Arc::downgrade(&self.inner);
        ListenerHandle::new(move || {
            if let Some(set) = weak.upgrade() {
                set.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invokes every registered callback with `event`.
    ///
    /// A panicking callback is logged and does not affect the others. This
    /// only holds in builds that unwind; under `panic = "abort"` a panic
    /// still terminates the process.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!("Listener panicked during emit");
            }
        }
    }

    /// Returns the number of registered callbacks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if no callbacks are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

// ============================================================================
// ListenerHandle
// ============================================================================

/// Registration handle returned by every listener registration.
///
/// Dropping the handle keeps the listener registered.
#[must_use = "call unsubscribe() to remove the listener"]
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    /// Creates a handle that runs `remove` on unsubscribe.
    pub(crate) fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Creates a handle that does nothing on unsubscribe.
    #[inline]
    pub fn noop() -> Self {
        Self { remove: None }
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_and_unsubscribe() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&total);
        let handle = listeners.add(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 3);

        handle.unsubscribe();
        listeners.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.add(|_| panic!("boom"));
        let h = Arc::clone(&hits);
        let _good = listeners.add(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_registration() {
        let listeners = Listeners::<()>::new();
        let inner = listeners.clone();
        let _h = listeners.add(move |_| {
            let _ = inner.add(|_| {});
        });

        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_handle_outlives_set() {
        let listeners = Listeners::<()>::new();
        let handle = listeners.add(|_| {});
        drop(listeners);
        handle.unsubscribe();
    }

    #[test]
    fn test_debug_reports_len() {
        let listeners = Listeners::<u32>::new();
        let _h = listeners.add(|_| {});
        assert_eq!(format!("{listeners:?}"), "Listeners { len: 1 }");
    }
}
