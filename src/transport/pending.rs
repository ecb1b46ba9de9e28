//! In-flight request bookkeeping.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, RequestId};
use crate::protocol::Frame;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to in-flight requests.
pub(crate) type PendingMap = FxHashMap<RequestId, PendingRequest>;

/// Completion channel for a correlated request.
pub(crate) type ReplySender = oneshot::Sender<Result<Frame>>;

// ============================================================================
// PendingRequest
// ============================================================================

/// A request waiting for its correlated response.
///
/// Whoever removes the entry from the [`PendingMap`] completes it; every
/// other completion path then finds nothing and does nothing.
pub(crate) struct PendingRequest {
    /// Completion channel.
    pub(crate) reply: ReplySender,
    /// Timeout task.
    pub(crate) timer: JoinHandle<()>,
    /// Command name, for diagnostics and timeout errors.
    pub(crate) cmd: String,
    /// Target device, for the offline sweep.
    pub(crate) device: Option<DeviceId>,
    /// Registration time.
    pub(crate) created_at: Instant,
}

impl PendingRequest {
    /// Completes the request, cancelling its timer.
    pub(crate) fn complete(self, outcome: Result<Frame>) {
        self.timer.abort();
        let _ = self.reply.send(outcome);
    }
}

// ============================================================================
// PendingReply
// ============================================================================

/// The eventual outcome of a correlated request.
///
/// The request is registered and queued when this value is created;
/// awaiting it only observes the result.
#[must_use = "the request is sent regardless; await the reply to observe its outcome"]
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    rx: oneshot::Receiver<Result<Frame>>,
}

impl PendingReply {
    pub(crate) fn new(request_id: RequestId, rx: oneshot::Receiver<Result<Frame>>) -> Self {
        Self { request_id, rx }
    }

    /// Creates a reply that resolves immediately with `error`.
    pub(crate) fn failed(request_id: RequestId, error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { request_id, rx }
    }

    /// Returns the protocol id assigned to the request.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for PendingReply {
    type Output = Result<Frame>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::ConnectionClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================
