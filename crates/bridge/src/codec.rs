//! Payload codecs and the registry that routes encoding tags to them.
//!
//! Every event carries an encoding tag in its topic. The registry maps
//! that tag to a [`Codec`] which turns an [`EventData`] value into wire
//! bytes and back. Four codecs are built in:
//!
//! - `json`: human-readable, largest payloads
//! - `msgpack`: binary, compact
//! - `cbor`: binary, self-describing
//! - `raw`: byte passthrough for opaque frames
//!
//! Custom formats can be added with [`CodecRegistry::register`] or, for
//! one-off closures, [`CodecRegistry::register_fns`]. The registry is
//! assembled before the bridge starts and is immutable afterwards, so
//! encode and decode run without taking any lock.
//!
//! Codecs are pure: same input, same output, no side effects. Decoding
//! never touches the connection.

use std::collections::HashMap;

use super::{
    envelope::EventData,
    error::CodecError,
};

/// A payload format the bridge can speak.
///
/// Implementations must be stateless or internally synchronized; the
/// registry shares them between the publish and receive paths.
pub trait Codec: Send + Sync {
    /// Encodes a value to wire bytes.
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError>;

    /// Decodes wire bytes back to a value.
    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError>;
}

/// Extracts the structured value or reports that this codec cannot carry
/// raw bytes.
fn structured<'a>(data: &'a EventData, tag: &str) -> Result<&'a serde_json::Value, CodecError> {
    data.as_json().ok_or_else(|| {
        CodecError::Unencodable(format!(
            "raw bytes cannot be encoded as '{tag}', use the 'raw' encoding"
        ))
    })
}

/// JSON codec using serde_json.
#[derive(Copy, Clone)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError> {
        let value = structured(data, "json")?;
        serde_json::to_vec(value).map_err(|e| CodecError::Unencodable(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
        Ok(EventData::Json(value))
    }
}

/// MessagePack codec using rmp_serde.
#[derive(Copy, Clone)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError> {
        let value = structured(data, "msgpack")?;
        rmp_serde::to_vec(value).map_err(|e| CodecError::Unencodable(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError> {
        let value: serde_json::Value = rmp_serde::from_slice(payload)
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
        Ok(EventData::Json(value))
    }
}

/// CBOR codec using serde_cbor.
#[derive(Copy, Clone)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError> {
        let value = structured(data, "cbor")?;
        serde_cbor::to_vec(value).map_err(|e| CodecError::Unencodable(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError> {
        let value: serde_json::Value = serde_cbor::from_slice(payload)
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
        Ok(EventData::Json(value))
    }
}

/// Byte passthrough for opaque payloads such as camera frames.
#[derive(Copy, Clone)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError> {
        match data {
            EventData::Raw(bytes) => Ok(bytes.clone()),
            EventData::Json(_) => Err(CodecError::Unencodable(
                "structured values cannot be encoded as 'raw', use a structured encoding".into(),
            )),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError> {
        Ok(EventData::Raw(payload.to_vec()))
    }
}

type EncodeFn = dyn Fn(&EventData) -> Result<Vec<u8>, CodecError> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Result<EventData, CodecError> + Send + Sync;

/// Codec built from a pair of closures, see [`CodecRegistry::register_fns`].
struct FnCodec {
    encode: Box<EncodeFn>,
    decode: Box<DecodeFn>,
}

impl Codec for FnCodec {
    fn encode(&self, data: &EventData) -> Result<Vec<u8>, CodecError> {
        (self.encode)(data)
    }

    fn decode(&self, payload: &[u8]) -> Result<EventData, CodecError> {
        (self.decode)(payload)
    }
}

/// Maps encoding tags to codecs.
pub struct CodecRegistry {
    codecs: HashMap<String, Box<dyn Codec>>,
}

impl CodecRegistry {
    /// Creates an empty registry with no codecs at all.
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Creates a registry with the four built-in codecs registered under
    /// their canonical tags `json`, `msgpack`, `cbor` and `raw`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("json", JsonCodec);
        registry.register("msgpack", MessagePackCodec);
        registry.register("cbor", CborCodec);
        registry.register("raw", RawCodec);
        registry
    }

    /// Registers a codec under a tag, replacing any previous registration
    /// for the same tag.
    pub fn register(&mut self, tag: impl Into<String>, codec: impl Codec + 'static) {
        self.codecs.insert(tag.into(), Box::new(codec));
    }

    /// Registers a codec built from an encode and a decode closure.
    ///
    /// Convenient for one-off formats that do not warrant a named type:
    ///
    /// ```ignore
    /// registry.register_fns(
    ///     "upper",
    ///     |data| Ok(data.as_raw().unwrap_or_default().to_ascii_uppercase()),
    ///     |bytes| Ok(EventData::Raw(bytes.to_ascii_lowercase())),
    /// );
    /// ```
    pub fn register_fns<E, D>(&mut self, tag: impl Into<String>, encode: E, decode: D)
    where
        E: Fn(&EventData) -> Result<Vec<u8>, CodecError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<EventData, CodecError> + Send + Sync + 'static,
    {
        self.register(
            tag,
            FnCodec {
                encode: Box::new(encode),
                decode: Box::new(decode),
            },
        );
    }

    /// Returns whether a codec is registered under the tag.
    pub fn contains(&self, tag: &str) -> bool {
        self.codecs.contains_key(tag)
    }

    /// Encodes a value with the codec registered under `tag`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownEncoding`] when no codec is registered under
    /// the tag, otherwise whatever the codec itself reports.
    pub fn encode(&self, tag: &str, data: &EventData) -> Result<Vec<u8>, CodecError> {
        self.get(tag)?.encode(data)
    }

    /// Decodes payload bytes with the codec registered under `tag`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownEncoding`] when no codec is registered under
    /// the tag, otherwise whatever the codec itself reports.
    pub fn decode(&self, tag: &str, payload: &[u8]) -> Result<EventData, CodecError> {
        self.get(tag)?.decode(payload)
    }

    fn get(&self, tag: &str) -> Result<&dyn Codec, CodecError> {
        self.codecs
            .get(tag)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| CodecError::UnknownEncoding(tag.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventData {
        EventData::Json(serde_json::json!({"celsius": 21.5, "unit": "C"}))
    }

    #[test]
    fn test_json_codec_round_trip() {
        let registry = CodecRegistry::with_defaults();
        let bytes = registry.encode("json", &sample()).unwrap();
        let decoded = registry.decode("json", &bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_msgpack_codec_round_trip() {
        let registry = CodecRegistry::with_defaults();
        let bytes = registry.encode("msgpack", &sample()).unwrap();
        assert!(bytes.len() < registry.encode("json", &sample()).unwrap().len());
        let decoded = registry.decode("msgpack", &bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_cbor_codec_round_trip() {
        let registry = CodecRegistry::with_defaults();
        let bytes = registry.encode("cbor", &sample()).unwrap();
        let decoded = registry.decode("cbor", &bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_raw_codec_passes_bytes_through() {
        let registry = CodecRegistry::with_defaults();
        let frame = EventData::Raw(vec![0xff, 0xd8, 0xff, 0xe0]);
        let bytes = registry.encode("raw", &frame).unwrap();
        assert_eq!(bytes, vec![0xff, 0xd8, 0xff, 0xe0]);
        assert_eq!(registry.decode("raw", &bytes).unwrap(), frame);
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decode("bson", b"{}").unwrap_err();
        assert!(matches!(err, CodecError::UnknownEncoding(tag) if tag == "bson"));
    }

    #[test]
    fn test_truncated_json_is_malformed() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decode("json", b"{\"celsius\": 21.").unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }

    #[test]
    fn test_raw_codec_rejects_structured_values() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.encode("raw", &sample()).unwrap_err();
        assert!(matches!(err, CodecError::Unencodable(_)));
    }

    #[test]
    fn test_structured_codec_rejects_raw_bytes() {
        let registry = CodecRegistry::with_defaults();
        let err = registry
            .encode("json", &EventData::Raw(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, CodecError::Unencodable(_)));
    }

    #[test]
    fn test_custom_codec_replaces_builtin() {
        struct NullCodec;
        impl Codec for NullCodec {
            fn encode(&self, _data: &EventData) -> Result<Vec<u8>, CodecError> {
                Ok(Vec::new())
            }
            fn decode(&self, _payload: &[u8]) -> Result<EventData, CodecError> {
                Ok(EventData::Raw(Vec::new()))
            }
        }

        let mut registry = CodecRegistry::with_defaults();
        registry.register("json", NullCodec);
        assert!(registry.encode("json", &sample()).unwrap().is_empty());
    }

    #[test]
    fn test_register_fns_builds_working_codec() {
        let mut registry = CodecRegistry::new();
        registry.register_fns(
            "rev",
            |data| {
                let bytes = data
                    .as_raw()
                    .ok_or_else(|| CodecError::Unencodable("raw only".into()))?;
                Ok(bytes.iter().rev().copied().collect())
            },
            |payload| Ok(EventData::Raw(payload.iter().rev().copied().collect())),
        );

        let encoded = registry
            .encode("rev", &EventData::Raw(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(encoded, vec![3, 2, 1]);
        let decoded = registry.decode("rev", &encoded).unwrap();
        assert_eq!(decoded, EventData::Raw(vec![1, 2, 3]));
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = CodecRegistry::new();
        assert!(!registry.contains("json"));
        let err = registry
            .encode("json", &sample())
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownEncoding(_)));
    }
}
