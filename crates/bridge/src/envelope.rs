//! Event envelope and value types shared by the publish and receive paths.
//!
//! An [`EventEnvelope`] is the unit the bridge moves around: addressing
//! fields plus an encoded payload. The addressing fields travel in the
//! topic, the payload travels in the message body, and the encoding tag
//! names the codec that produced the body.
//!
//! [`EventData`] is the decoded view of a payload. Structured values are
//! held as `serde_json::Value` regardless of which wire format carried
//! them, so handlers never need to care whether a peer published JSON,
//! MessagePack or CBOR.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::CodecError;

/// Delivery guarantee requested for one outbound event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryQuality {
    /// Fire and forget. The event is sent once and may be lost if the
    /// link drops; the sender is never told either way.
    #[default]
    AtMostOnce,

    /// The broker must acknowledge receipt. The sender waits for that
    /// acknowledgement and the event survives reconnects, at the cost of
    /// possible duplicate delivery.
    AtLeastOnce,
}

impl std::fmt::Display for DeliveryQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtMostOnce => write!(f, "at_most_once"),
            Self::AtLeastOnce => write!(f, "at_least_once"),
        }
    }
}

/// Decoded event value.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// A structured value. Produced and consumed by the structured codecs
    /// (`json`, `msgpack`, `cbor`).
    Json(serde_json::Value),

    /// Opaque bytes, passed through untouched by the `raw` codec.
    Raw(Vec<u8>),
}

impl EventData {
    /// Builds a structured value from anything serde can serialize.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Unencodable`] when the value cannot be
    /// represented as JSON, for example a map with non-string keys.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        let value =
            serde_json::to_value(value).map_err(|e| CodecError::Unencodable(e.to_string()))?;
        Ok(Self::Json(value))
    }

    /// Borrows the structured value, if this is one.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Borrows the raw bytes, if this is a raw value.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Self::Json(_) => None,
            Self::Raw(bytes) => Some(bytes),
        }
    }
}

impl From<serde_json::Value> for EventData {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for EventData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

/// One event as it moves through the bridge.
///
/// On the outbound path the payload has already been encoded by the time
/// an envelope exists; encoding failures surface to the caller before
/// anything is queued. On the inbound path the envelope is reconstructed
/// from the topic and body of the received message, and the timestamp
/// records when this process saw it.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Device class, e.g. `"thermostat"`.
    pub device_type: String,
    /// Device instance within the class.
    pub device_id: String,
    /// Event name, e.g. `"temperature"`.
    pub event_name: String,
    /// Encoding tag naming the codec that produced the payload.
    pub encoding: String,
    /// Encoded payload bytes.
    pub payload: Bytes,
    /// When the envelope was created, UTC.
    pub timestamp: OffsetDateTime,
}

impl EventEnvelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(
        device_type: impl Into<String>,
        device_id: impl Into<String>,
        event_name: impl Into<String>,
        encoding: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            device_id: device_id.into(),
            event_name: event_name.into(),
            encoding: encoding.into(),
            payload: payload.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_quality_default_is_at_most_once() {
        assert_eq!(DeliveryQuality::default(), DeliveryQuality::AtMostOnce);
    }

    #[test]
    fn test_delivery_quality_serde_names() {
        let quality: DeliveryQuality = serde_json::from_str("\"at_least_once\"").unwrap();
        assert_eq!(quality, DeliveryQuality::AtLeastOnce);
        assert_eq!(
            serde_json::to_string(&DeliveryQuality::AtMostOnce).unwrap(),
            "\"at_most_once\""
        );
    }

    #[test]
    fn test_event_data_json_constructor() {
        #[derive(Serialize)]
        struct Reading {
            celsius: f64,
        }

        let data = EventData::json(&Reading { celsius: 21.5 }).unwrap();
        assert_eq!(data.as_json().unwrap()["celsius"], 21.5);
        assert!(data.as_raw().is_none());
    }

    #[test]
    fn test_event_data_raw_accessor() {
        let data = EventData::from(vec![0xde, 0xad]);
        assert_eq!(data.as_raw().unwrap(), &[0xde, 0xad]);
        assert!(data.as_json().is_none());
    }

    #[test]
    fn test_envelope_new_stamps_current_time() {
        let before = OffsetDateTime::now_utc();
        let envelope = EventEnvelope::new("thermostat", "t-01", "temperature", "json", vec![1u8]);
        let after = OffsetDateTime::now_utc();

        assert!(envelope.timestamp >= before);
        assert!(envelope.timestamp <= after);
        assert_eq!(envelope.device_type, "thermostat");
        assert_eq!(envelope.encoding, "json");
    }
}
