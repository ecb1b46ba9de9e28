//! Cross-context envelopes and ports.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ErrorShape;
use crate::identifiers::CorrelationId;
use crate::protocol::{Command, Frame};
use crate::transport::ConnectionStatus;

// ============================================================================
// Envelope
// ============================================================================

/// A message between a child context and the master.
///
/// Serialized with a `kind` tag:
///
/// ```json
/// {"kind":"request","rid":"6f1c...","payload":{"cmd":"status","requestId":1}}
/// {"kind":"result","rid":"6f1c...","outcome":{"err":{"code":2004,"msg":"device offline"}}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Envelope {
    /// Child → master: is anyone serving this port?
    Discover {
        /// Probe correlation id.
        rid: CorrelationId,
    },

    /// Master → child: answer to [`Envelope::Discover`].
    DiscoverAck {
        /// Correlation id of the probe.
        rid: CorrelationId,
    },

    /// Child → master: correlated request to relay.
    Request {
        /// Proxy correlation id.
        rid: CorrelationId,
        /// Command to send on the master's link.
        payload: Command,
    },

    /// Master → child: request received. Liveness only.
    Ack {
        /// Correlation id of the request.
        rid: CorrelationId,
    },

    /// Master → child: outcome of a relayed request.
    Result {
        /// Correlation id of the request.
        rid: CorrelationId,
        /// Response frame or normalized error.
        outcome: ProxyOutcome,
    },

    /// Child → master: command to send without reply.
    Fire {
        /// Command to send; its request id is kept.
        payload: Command,
    },

    /// Master → child: inbound frame observed on the master's link.
    Event {
        /// The frame.
        frame: Frame,
    },

    /// Master → child: connection status of the master's link.
    Status {
        /// The new status.
        status: ConnectionStatus,
    },
}

/// Outcome carried by [`Envelope::Result`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyOutcome {
    /// The response frame.
    Ok(Frame),
    /// The failure, normalized.
    Err(ErrorShape),
}

// ============================================================================
// ContextPort
// ============================================================================

/// One end of a bidirectional envelope channel between two contexts.
#[derive(Debug)]
pub struct ContextPort {
    pub(crate) tx: mpsc::UnboundedSender<Envelope>,
    pub(crate) rx: mpsc::UnboundedReceiver<Envelope>,
}

impl ContextPort {
    /// Creates two connected ports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self { tx: a_tx, rx: b_rx }, Self { tx: b_tx, rx: a_rx })
    }

    /// Posts an envelope to the other end.
    ///
    /// Returns `false` if the other end is gone.
    pub fn post(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).is_ok()
    }

    /// Receives the next envelope, or `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Splits into sender and receiver halves.
    pub(crate) fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        (self.tx, self.rx)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    #[test]
    fn test_request_wire_shape() {
        let rid = CorrelationId::from("c-1");
        let envelope = Envelope::Request {
            rid,
            payload: Command::new("status").device(42u64),
        };

        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["kind"], "request");
        assert_eq!(value["rid"], "c-1");
        assert_eq!(value["payload"]["cmd"], "status");
    }

    #[test]
    fn test_result_err_shape() {
        let envelope: Envelope = serde_json::from_value(json!({
            "kind": "result",
            "rid": "c-2",
            "outcome": {"err": {"code": -100, "msg": "proxy ack timeout (NO_ACK)"}}
        }))
        .expect("deserialize");

        match envelope {
            Envelope::Result {
                outcome: ProxyOutcome::Err(shape),
                ..
            } => assert_eq!(shape.code, -100),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_status_kind() {
        let value = serde_json::to_value(Envelope::Status {
            status: ConnectionStatus::Connected,
        })
        .expect("serialize");
        assert_eq!(value, json!({"kind": "status", "status": "connected"}));
        assert_eq!(
            serde_json::to_value(Envelope::DiscoverAck {
                rid: CorrelationId::from("x")
            })
            .expect("serialize")["kind"],
            Value::from("discoverAck")
        );
    }

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (a, mut b) = ContextPort::pair();
        assert!(a.post(Envelope::Discover {
            rid: CorrelationId::from("p")
        }));
        assert!(matches!(b.recv().await, Some(Envelope::Discover { .. })));

        drop(b);
        assert!(!a.post(Envelope::Discover {
            rid: CorrelationId::from("q")
        }));
    }
}
