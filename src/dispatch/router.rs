//! Inbound frame router.
//!
//! Fans every inbound [`Frame`] out to raw listeners, to listeners
//! registered for its exact command name, and to predicate matchers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::protocol::Frame;

use super::{ListenerHandle, Listeners};

// ============================================================================
// Router
// ============================================================================

/// Fans inbound frames out by command name.
///
/// Cheap to clone; clones share the same registrations.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    /// Listeners for every frame.
    raw: Listeners<Frame>,
    /// Listeners keyed by exact command name.
    by_cmd: Mutex<FxHashMap<String, Listeners<Frame>>>,
    /// Predicate-filtered listeners.
    matchers: Listeners<Frame>,
}

impl Router {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every inbound frame.
    pub fn on_raw<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.raw.add(callback)
    }

    /// Registers a listener for frames whose `cmd` equals `cmd`.
    pub fn on_cmd<F>(&self, cmd: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let listeners = self
            .inner
            .by_cmd
            .lock()
            .entry(cmd.into())
            .or_default()
            .clone();
        listeners.add(callback)
    }

    /// Registers a listener for frames accepted by `filter`.
    pub fn on_match<P, F>(&self, filter: P, callback: F) -> ListenerHandle
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.matchers.add(move |frame| {
            if filter(frame) {
                callback(frame);
            }
        })
    }

    /// Dispatches a frame to every interested listener.
    pub fn dispatch(&self, frame: &Frame) {
        trace!(cmd = frame.cmd(), request_id = ?frame.request_id, "Dispatching frame");

        self.inner.raw.emit(frame);

        if let Some(cmd) = frame.cmd.as_deref() {
            let listeners = self.inner.by_cmd.lock().get(cmd).cloned();
            if let Some(listeners) = listeners {
                listeners.emit(frame);
            }
        }

        self.inner.matchers.emit(frame);
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.inner.raw.clear();
        self.inner.by_cmd.lock().clear();
        self.inner.matchers.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::identifiers::DeviceId;

    fn frame(cmd: &str) -> Frame {
        Frame {
            cmd: Some(cmd.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cmd_routing() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let _handle = router.on_cmd("photoResponse", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(&frame("photoResponse"));
        router.dispatch(&frame("cameraZoomResponse"));
        router.dispatch(&Frame::default());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_sees_everything() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let handle = router.on_raw(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(&frame("a"));
        router.dispatch(&Frame::default());
        handle.unsubscribe();
        router.dispatch(&frame("b"));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_match_filter() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let _handle = router.on_match(
            |f| f.device() == Some(DeviceId::new(42)),
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut to_42 = frame("modeDataResponse");
        to_42.to = Some(crate::protocol::Address::device(42));
        router.dispatch(&to_42);
        router.dispatch(&frame("modeDataResponse"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
