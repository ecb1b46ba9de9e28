//! Type-safe identifiers.
//!
//! Newtype wrappers keep protocol request ids, device ids and proxy
//! correlation ids from being mixed up at compile time.
//!
//! Numeric ids deserialize leniently: the server sometimes sends them as
//! JSON strings (`"42"`) instead of numbers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::protocol::lenient::Numeric;

// ============================================================================
// RequestId
// ============================================================================

/// Protocol-level request identifier carried in the `requestId` field.
///
/// Generated by [`RequestIdGenerator`](crate::transport::RequestIdGenerator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Numeric::deserialize(deserializer)?
            .as_u64()
            .map(Self)
            .ok_or_else(|| D::Error::custom("requestId must be a non-negative integer"))
    }
}

// ============================================================================
// DeviceId
// ============================================================================

/// Identifier of a remote probe device (the `id` of a `to`/`from` address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Wraps a raw device id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for DeviceId {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Numeric::deserialize(deserializer)?
            .as_u64()
            .map(Self)
            .ok_or_else(|| D::Error::custom("device id must be a non-negative integer"))
    }
}

// ============================================================================
// CorrelationId
// ============================================================================

/// Locally generated id matching a proxied call to its ack and result.
///
/// Distinct from [`RequestId`]: it never reaches the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    #[inline]
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    #[inline]
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_lenient() {
        let a: RequestId = serde_json::from_str("123").unwrap();
        let b: RequestId = serde_json::from_str("\"123\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_u64(), 123);
        assert!(serde_json::from_str::<RequestId>("-5").is_err());
        assert!(serde_json::from_str::<RequestId>("\"abc\"").is_err());
    }

    #[test]
    fn test_device_id_serializes_as_number() {
        let json = serde_json::to_string(&DeviceId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
