//! Outbound command frames.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{DeviceId, RequestId};

use super::Address;

// ============================================================================
// Command
// ============================================================================

/// A command sent to the gateway.
///
/// # Format
///
/// ```json
/// {
///   "cmd": "dipOneChannel",
///   "to": { "type": 1, "id": 42 },
///   "data": {},
///   "requestId": 1234567890
/// }
/// ```
///
/// `requestId` is assigned by the sending path unless already set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Command name.
    pub cmd: String,

    /// Destination address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Command {
    /// Creates a command with no target and no payload.
    #[inline]
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            to: None,
            data: None,
            request_id: None,
        }
    }

    /// Addresses the command to a probe device.
    #[inline]
    #[must_use]
    pub fn device(mut self, id: impl Into<DeviceId>) -> Self {
        self.to = Some(Address::device(id));
        self
    }

    /// Sets an explicit destination address.
    #[inline]
    #[must_use]
    pub fn to(mut self, address: Address) -> Self {
        self.to = Some(address);
        self
    }

    /// Sets the payload.
    #[inline]
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Presets the request id.
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Returns the target device, if addressed to one.
    #[inline]
    #[must_use]
    pub fn target_device(&self) -> Option<DeviceId> {
        self.to.as_ref().and_then(|a| a.id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_command_serialization() {
        let command = Command::new("dipOneChannel")
            .device(42)
            .data(json!({}))
            .with_request_id(RequestId::new(9));

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(
            value,
            json!({
                "cmd": "dipOneChannel",
                "to": { "type": 1, "id": 42 },
                "data": {},
                "requestId": 9
            })
        );
    }

    #[test]
    fn test_command_omits_empty_fields() {
        let json = serde_json::to_string(&Command::new("ping")).expect("serialize");
        assert_eq!(json, r#"{"cmd":"ping"}"#);
    }

    #[test]
    fn test_target_device() {
        assert_eq!(
            Command::new("photo").device(7).target_device(),
            Some(DeviceId::new(7))
        );
        assert_eq!(Command::new("photo").target_device(), None);
    }
}
