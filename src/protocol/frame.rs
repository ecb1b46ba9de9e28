//! Inbound frame and address types.
//!
//! Every message the gateway pushes is a [`Frame`]: responses to requests,
//! unsolicited notifications and error reports share the same shape.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, RequestId};

use super::codes;
use super::lenient;

// ============================================================================
// Address
// ============================================================================

/// A `to`/`from` address.
///
/// # Format
///
/// ```json
/// { "type": 1, "id": 42 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Address type (`1` for probe devices).
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient::opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<i64>,

    /// Addressed device, if any.
    #[serde(
        default,
        deserialize_with = "lenient::opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<DeviceId>,
}

impl Address {
    /// Creates a device address (`type: 1`).
    #[inline]
    #[must_use]
    pub fn device(id: impl Into<DeviceId>) -> Self {
        Self {
            kind: Some(codes::DEVICE_ADDRESS_TYPE),
            id: Some(id.into()),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A message received from the gateway.
///
/// # Format
///
/// ```json
/// {
///   "cmd": "dipOneChannelResponse",
///   "code": 0,
///   "requestId": 1234567890,
///   "to": { "type": 1, "id": 42 },
///   "from": { "type": 1, "id": 42 },
///   "data": [ ... ]
/// }
/// ```
///
/// Unknown top-level fields are preserved in [`Frame::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Command name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Status code (absent or `0` means success).
    #[serde(
        default,
        deserialize_with = "lenient::opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<i64>,

    /// Correlation id echoed from the request.
    #[serde(
        default,
        deserialize_with = "lenient::opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<RequestId>,

    /// Destination address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Source address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Server message accompanying a non-zero code.
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// Parses a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a JSON object.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns `true` if the code is absent or zero.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.is_none_or(|c| c == codes::SUCCESS)
    }

    /// Returns `true` if this frame carries the given status code.
    #[inline]
    #[must_use]
    pub fn has_code(&self, code: i64) -> bool {
        self.code == Some(code)
    }

    /// Returns the command name, or `""`.
    #[inline]
    #[must_use]
    pub fn cmd(&self) -> &str {
        self.cmd.as_deref().unwrap_or_default()
    }

    /// Returns the device this frame concerns: `to.id`, falling back to `from.id`.
    #[must_use]
    pub fn device(&self) -> Option<DeviceId> {
        self.to
            .as_ref()
            .and_then(|a| a.id)
            .or_else(|| self.from.as_ref().and_then(|a| a.id))
    }

    /// For `<origin>Response` frames, returns `<origin>`.
    #[must_use]
    pub fn response_origin(&self) -> Option<&str> {
        self.cmd
            .as_deref()
            .map(str::trim)
            .and_then(|c| c.strip_suffix(codes::RESPONSE_SUFFIX))
            .filter(|origin| !origin.is_empty())
    }

    /// Returns `true` if the payload is missing, `null`, `[]` or `{}`.
    #[must_use]
    pub fn data_is_empty(&self) -> bool {
        match &self.data {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        }
    }

    /// Converts a correlated frame into the request outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceOffline`] for code 2004
    /// - [`Error::Protocol`] for any other non-zero code
    pub fn into_result(self) -> Result<Self> {
        match self.code {
            None | Some(codes::SUCCESS) => Ok(self),
            Some(codes::DEVICE_OFFLINE) => match self.device() {
                Some(device) => Err(Error::device_offline(device, self.request_id)),
                None => Err(Error::protocol(codes::DEVICE_OFFLINE, "device offline")),
            },
            Some(code) => {
                let message = self
                    .msg
                    .unwrap_or_else(|| format!("{} failed", self.cmd.unwrap_or_default()));
                Err(Error::protocol(code, message))
            }
        }
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
    fn test_parse_response() {
        let frame = Frame::parse(
            r#"{"cmd":"dipOneChannelResponse","code":0,"requestId":"99",
                "to":{"type":1,"id":"42"},"data":[1,2]}"#,
        )
        .expect("parse");

        assert!(frame.is_success());
        assert_eq!(frame.request_id, Some(RequestId::new(99)));
        assert_eq!(frame.device(), Some(DeviceId::new(42)));
        assert_eq!(frame.response_origin(), Some("dipOneChannel"));
        assert!(!frame.data_is_empty());
    }

    #[test]
    fn test_device_falls_back_to_from() {
        let frame = Frame::parse(r#"{"code":2004,"from":{"id":7}}"#).expect("parse");
        assert_eq!(frame.device(), Some(DeviceId::new(7)));
        assert!(frame.has_code(codes::DEVICE_OFFLINE));
        assert!(!frame.is_success());
    }

    #[test]
    fn test_empty_data_classification() {
        let mut frame = Frame::default();
        assert!(frame.data_is_empty());

        frame.data = Some(json!([]));
        assert!(frame.data_is_empty());

        frame.data = Some(json!({}));
        assert!(frame.data_is_empty());

        frame.data = Some(json!({"angle": 1.5}));
        assert!(!frame.data_is_empty());

        frame.data = Some(json!(0));
        assert!(!frame.data_is_empty());
    }

    #[test]
    fn test_response_origin_requires_suffix() {
        let frame = Frame {
            cmd: Some("modeData".into()),
            ..Default::default()
        };
        assert_eq!(frame.response_origin(), None);

        let bare = Frame {
            cmd: Some("Response".into()),
            ..Default::default()
        };
        assert_eq!(bare.response_origin(), None);
    }

    #[test]
    fn test_into_result_protocol_error() {
        let frame = Frame::parse(r#"{"cmd":"photoResponse","code":3002,"msg":"busy"}"#)
            .expect("parse");
        let err = frame.into_result().unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 3002, ref message } if message == "busy"));
    }

    #[test]
    fn test_into_result_offline() {
        let frame = Frame::parse(r#"{"code":2004,"requestId":5,"to":{"id":42}}"#).expect("parse");
        let err = frame.into_result().unwrap_err();
        assert!(err.is_offline());
    }

    #[test]
    fn test_garbage_ids_do_not_drop_frame() {
        let frame = Frame::parse(r#"{"cmd":"error","code":1004,"requestId":""}"#).expect("parse");
        assert_eq!(frame.request_id, None);
        assert!(frame.has_code(codes::SESSION_SUPERSEDED));

        let frame = Frame::parse(r#"{"code":2004,"requestId":"n/a","to":{"type":1,"id":"x"},"from":{"id":8}}"#)
            .expect("parse");
        assert_eq!(frame.request_id, None);
        assert_eq!(frame.device(), Some(DeviceId::new(8)));
    }

    #[test]
    fn test_extra_fields_preserved() {
        let frame = Frame::parse(r#"{"cmd":"x","devId":3}"#).expect("parse");
        assert_eq!(frame.extra.get("devId"), Some(&json!(3)));
        let text = serde_json::to_string(&frame).expect("serialize");
        assert!(text.contains("\"devId\":3"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(Frame::parse("not json").is_err());
    }
}
