//! Scheduler lifecycle events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::{DeviceId, RequestId};

use super::entry::PollStrategy;

/// Why an entry stopped polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuspendReason {
    /// Consecutive failures reached the threshold.
    FailThreshold,
    /// The gateway reported the device offline.
    Offline,
    /// Suspended by a caller.
    Manual,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailThreshold => f.write_str("fail-threshold"),
            Self::Offline => f.write_str("offline"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// An entry was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendEvent {
    pub cmd: String,
    #[serde(rename = "devId")]
    pub device: DeviceId,
    pub reason: SuspendReason,
}

/// An entry was resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeEvent {
    pub cmd: String,
    #[serde(rename = "devId")]
    pub device: DeviceId,
}

/// A response for an entry was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEvent {
    pub cmd: String,
    #[serde(rename = "devId")]
    pub device: DeviceId,
    /// Response request id; always `None` for shifting entries.
    pub request_id: Option<RequestId>,
}

/// A poll was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEvent {
    pub cmd: String,
    #[serde(rename = "devId")]
    pub device: DeviceId,
    pub request_id: RequestId,
    /// Sent by [`Poller::force_once`](super::Poller::force_once).
    pub force: bool,
    pub strategy: PollStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_event_wire_shape() {
        let event = SuspendEvent {
            cmd: "dipOneChannel".into(),
            device: DeviceId::new(42),
            reason: SuspendReason::FailThreshold,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["reason"], "fail-threshold");
        assert_eq!(value["devId"], 42);
        assert!(value.get("device").is_none());
        assert_eq!(SuspendReason::Offline.to_string(), "offline");
    }

    #[test]
    fn test_resume_and_success_use_dev_id() {
        let resume = ResumeEvent {
            cmd: "tiltStatus".into(),
            device: DeviceId::new(7),
        };
        let value = serde_json::to_value(&resume).expect("serialize");
        assert_eq!(value["devId"], 7);

        let success = SuccessEvent {
            cmd: "tiltStatus".into(),
            device: DeviceId::new(7),
            request_id: None,
        };
        let value = serde_json::to_value(&success).expect("serialize");
        assert_eq!(value["devId"], 7);
        assert!(value["requestId"].is_null());
    }
}
