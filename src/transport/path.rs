//! The send path abstraction shared by direct and proxied contexts.

use async_trait::async_trait;

use crate::dispatch::Router;
use crate::error::Result;
use crate::identifiers::RequestId;
use crate::protocol::{Command, Frame};

/// A way to reach the gateway.
///
/// Implemented by [`Link`](super::Link) in the context owning the socket,
/// and by [`ProxyClient`](crate::proxy::ProxyClient) in contexts relaying
/// through it.
#[async_trait]
pub trait SendPath: Send + Sync {
    /// Sends a correlated request and waits for its outcome.
    async fn request(&self, command: Command) -> Result<Frame>;

    /// Sends without waiting; returns the request id for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command could not be handed off at all.
    fn fire(&self, command: Command) -> Result<RequestId>;

    /// Returns the router receiving inbound frames for this path.
    fn router(&self) -> Router;
}
