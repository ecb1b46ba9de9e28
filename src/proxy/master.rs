//! Master side: serves child contexts over the owned [`Link`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::dispatch::ListenerHandle;
use crate::transport::Link;

use super::envelope::{ContextPort, Envelope, ProxyOutcome};

// ============================================================================
// Types
// ============================================================================

type ChildSenders = Arc<Mutex<Vec<mpsc::UnboundedSender<Envelope>>>>;

// ============================================================================
// ProxyMaster
// ============================================================================

/// Shares one [`Link`] with any number of child contexts.
///
/// Every inbound frame and status change on the link is relayed to all
/// attached children for as long as the master lives.
pub struct ProxyMaster {
    link: Link,
    children: ChildSenders,
    relays: Vec<ListenerHandle>,
}

impl ProxyMaster {
    /// Creates a master serving `link`.
    #[must_use]
    pub fn new(link: Link) -> Self {
        let children: ChildSenders = Arc::default();

        let relay = Arc::clone(&children);
        let frames = link.router().on_raw(move |frame| {
            broadcast(&relay, || Envelope::Event {
                frame: frame.clone(),
            });
        });

        let relay = Arc::clone(&children);
        let status = link.on_status(move |status| {
            broadcast(&relay, || Envelope::Status { status: *status });
        });

        Self {
            link,
            children,
            relays: vec![frames, status],
        }
    }

    /// Attaches a new child and returns its end of the port.
    ///
    /// The child should [`discover`](super::ProxyClient::discover) over it.
    pub fn attach(&self) -> ContextPort {
        let (master_end, child_end) = ContextPort::pair();
        let (tx, rx) = master_end.split();

        let _ = tx.send(Envelope::Status {
            status: self.link.status(),
        });
        self.children.lock().push(tx.clone());

        tokio::spawn(serve(self.link.clone(), tx, rx));
        debug!(children = self.child_count(), "Child context attached");
        child_end
    }

    /// Returns the number of children still connected.
    #[must_use]
    pub fn child_count(&self) -> usize {
        let mut children = self.children.lock();
        children.retain(|tx| !tx.is_closed());
        children.len()
    }

    /// Returns the served link.
    #[inline]
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }
}

impl Drop for ProxyMaster {
    fn drop(&mut self) {
        for relay in self.relays.drain(..) {
            relay.unsubscribe();
        }
    }
}

/// Sends one envelope to every live child, pruning dead ones.
fn broadcast(children: &ChildSenders, make: impl Fn() -> Envelope) {
    let mut children = children.lock();
    children.retain(|tx| tx.send(make()).is_ok());
}

/// Serves one child until its port closes.
async fn serve(
    link: Link,
    tx: mpsc::UnboundedSender<Envelope>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Discover { rid } => {
                let _ = tx.send(Envelope::DiscoverAck { rid });
            }

            Envelope::Request { rid, payload } => {
                let _ = tx.send(Envelope::Ack { rid: rid.clone() });

                trace!(rid = %rid, cmd = %payload.cmd, "Relaying child request");
                let reply = link.send_request(payload);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = match reply.await {
                        Ok(frame) => ProxyOutcome::Ok(frame),
                        Err(e) => ProxyOutcome::Err(e.shape()),
                    };
                    let _ = tx.send(Envelope::Result { rid, outcome });
                });
            }

            Envelope::Fire { payload } => {
                let rid = link.fire_and_forget(payload);
                trace!(request_id = %rid, "Relayed child fire");
            }

            other => {
                debug!(envelope = ?other, "Ignoring unexpected envelope from child");
            }
        }
    }

    debug!("Child context detached");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::hooks::{StaticAuth, TracingNotifier};
    use crate::identifiers::CorrelationId;
    use crate::protocol::Command;
    use crate::transport::{ConnectionStatus, LinkOptions};

    fn offline_link() -> Link {
        Link::new(
            LinkOptions::new("ws://127.0.0.1:9/ws")
                .with_force_secure(false)
                .with_request_timeout(Duration::from_secs(5)),
            Arc::new(StaticAuth::anonymous()),
            Arc::new(TracingNotifier),
        )
    }

    #[tokio::test]
    async fn test_discover_and_status_on_attach() {
        let master = ProxyMaster::new(offline_link());
        let mut port = master.attach();

        assert_eq!(
            port.recv().await,
            Some(Envelope::Status {
                status: ConnectionStatus::Disconnected
            })
        );

        let rid = CorrelationId::generate();
        assert!(port.post(Envelope::Discover { rid: rid.clone() }));
        assert_eq!(port.recv().await, Some(Envelope::DiscoverAck { rid }));
    }

    #[tokio::test]
    async fn test_request_is_acked_then_answered() {
        let link = offline_link();
        let master = ProxyMaster::new(link.clone());
        let mut port = master.attach();
        let _status = port.recv().await;

        let rid = CorrelationId::generate();
        port.post(Envelope::Request {
            rid: rid.clone(),
            payload: Command::new("status").device(42u64),
        });

        assert_eq!(port.recv().await, Some(Envelope::Ack { rid: rid.clone() }));

        // Wait until the master registered the relayed request.
        while link.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        let pending = link.pending_ids();
        link.inject(&format!(r#"{{"cmd":"statusResponse","code":0,"requestId":{}}}"#, pending[0]));

        loop {
            match port.recv().await {
                Some(Envelope::Result { rid: got, outcome }) => {
                    assert_eq!(got, rid);
                    assert!(matches!(outcome, ProxyOutcome::Ok(_)));
                    break;
                }
                Some(Envelope::Event { .. }) => continue,
                other => panic!("unexpected envelope: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_fire_is_forwarded_without_pending() {
        let link = offline_link();
        let master = ProxyMaster::new(link.clone());
        let port = master.attach();

        port.post(Envelope::Fire {
            payload: Command::new("ping")
                .with_request_id(crate::identifiers::RequestId::new(991)),
        });

        while link.queued_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_relayed_to_children() {
        let link = offline_link();
        let master = ProxyMaster::new(link.clone());
        let mut first = master.attach();
        let mut second = master.attach();
        let _ = first.recv().await;
        let _ = second.recv().await;

        link.inject(r#"{"cmd":"alarm","data":[1]}"#);

        for port in [&mut first, &mut second] {
            match port.recv().await {
                Some(Envelope::Event { frame }) => assert_eq!(frame.cmd(), "alarm"),
                other => panic!("unexpected envelope: {other:?}"),
            }
        }

        drop(second);
        assert_eq!(master.child_count(), 1);
    }
}
