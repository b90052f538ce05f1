//! Error types for the bridge.
//!
//! Errors are split by area rather than collected into one catch-all enum:
//!
//! - [`ConnError`]: connection lifecycle (dialing, TLS, retry exhaustion)
//! - [`PublishError`]: outbound event delivery
//! - [`CodecError`]: payload encoding and decoding
//! - [`HandlerError`]: inbound event dispatch
//! - [`ConfigError`]: configuration loading and validation
//!
//! Callers match on the area they interact with instead of wading through
//! unrelated variants. Operations that can fail for more than one reason
//! return the error of the layer that owns the failure: `Publisher::send`
//! returns [`PublishError`] and wraps the codec failure it may hit, while
//! `Bridge::connect` returns [`ConnError`].
//!
//! Messages are written for operators reading logs. For debugging, the
//! `Debug` format carries the full variant structure.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while encoding or decoding event payloads.
///
/// Codec failures never affect the connection. On the outbound path they
/// surface through [`PublishError::EncodingFailed`] before anything is
/// queued; on the inbound path they are logged and counted, and the
/// message is skipped.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No codec is registered under the requested encoding tag.
    ///
    /// The tag travels in the topic, so a peer publishing with a format
    /// this process never registered lands here.
    #[error("Unknown encoding '{0}'")]
    UnknownEncoding(String),

    /// The payload bytes could not be decoded with the selected codec.
    ///
    /// Usually truncation or a peer that labels its payloads with the
    /// wrong format tag.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The event value cannot be represented in the selected encoding.
    ///
    /// For example, publishing a structured value through the `raw`
    /// codec, which only passes byte payloads through.
    #[error("Value not encodable: {0}")]
    Unencodable(String),
}

/// Errors raised by the connection lifecycle.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Transport-level failure: socket errors, protocol violations, or a
    /// broken broker handshake.
    ///
    /// Boxed because `rumqttc::ConnectionError` is large and would bloat
    /// every `Result` carrying this enum.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<rumqttc::ConnectionError>),

    /// The broker accepted the network connection but refused the session,
    /// typically bad credentials or a rejected client id.
    ///
    /// Retrying cannot help; the supervisor gives up immediately instead
    /// of entering backoff.
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    /// Timed out waiting for the connection to be established.
    #[error("Timed out waiting for connection")]
    Timeout,

    /// An established session ended, with a transport-specific
    /// explanation. The supervisor normally reconnects after this.
    #[error("Connection dropped: {0}")]
    Dropped(String),

    /// TLS setup failed before any traffic was exchanged: missing or
    /// unreadable certificate files, or a handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The bridge has been shut down and no further connection work will
    /// be attempted.
    #[error("Bridge is closed")]
    Closed,

    /// The reconnect policy gave up after the given number of attempts.
    ///
    /// This signals a sustained outage rather than a transient glitch.
    #[error("Connection attempts exhausted after {0} tries")]
    Exhausted(u32),

    /// File I/O failed while preparing the connection, usually while
    /// loading TLS certificate material from disk.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Boxing conversion so `?` works on `rumqttc::ConnectionError` without
/// inflating the size of [`ConnError`] itself.
impl From<rumqttc::ConnectionError> for ConnError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        ConnError::Transport(Box::new(err))
    }
}

/// The local client could not hand a request to the event loop, which
/// only happens once the connection task has stopped.
impl From<rumqttc::ClientError> for ConnError {
    fn from(_: rumqttc::ClientError) -> Self {
        ConnError::Closed
    }
}

/// Errors raised while publishing an outbound event.
#[derive(Debug, Error)]
pub enum PublishError {
    /// No broker acknowledgement arrived within the configured publish
    /// timeout.
    ///
    /// The event itself is not lost: it stays queued and is retried on
    /// the next connection. This error tells the caller that confirmation
    /// did not arrive in time, not that delivery failed.
    #[error("Timed out waiting for publish acknowledgement")]
    Timeout,

    /// The event value could not be encoded with the requested codec.
    ///
    /// Raised before the event is queued; nothing is sent.
    #[error("Encoding failed: {0}")]
    EncodingFailed(#[from] CodecError),

    /// The outbound queue is full and could not accept the event within
    /// the publish timeout.
    #[error("Outbound queue is full")]
    QueueFull,

    /// The bridge has shut down; no further publishes are possible.
    #[error("Bridge is closed")]
    BridgeClosed,

    /// The bridge has no device identity of its own.
    ///
    /// Application bridges must name the device they publish for, using the
    /// explicit-address send methods.
    #[error("Bridge has no device identity; use send_as with an explicit device address")]
    MissingIdentity,
}

/// Failure report produced while dispatching one inbound event.
///
/// Handler failures never propagate into the receive loop. The dispatcher
/// builds one of these, logs it, and bumps the error counter.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error for this event.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The handler did not finish within the allowed time.
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more fields violate their constraints. The wrapped value
    /// reports every failing field, not just the first.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::UnknownEncoding("bson".into());
        assert_eq!(err.to_string(), "Unknown encoding 'bson'");
    }

    #[test]
    fn test_conn_error_exhausted_display() {
        let err = ConnError::Exhausted(6);
        assert_eq!(err.to_string(), "Connection attempts exhausted after 6 tries");
    }

    #[test]
    fn test_conn_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "ca.pem missing");
        let conn_err: ConnError = io_err.into();
        assert!(conn_err.to_string().contains("ca.pem missing"));
    }

    #[test]
    fn test_publish_error_wraps_codec_error() {
        let err: PublishError = CodecError::MalformedPayload("eof at byte 3".into()).into();
        assert_eq!(
            err.to_string(),
            "Encoding failed: Malformed payload: eof at byte 3"
        );
    }

    #[test]
    fn test_handler_error_timeout_display() {
        let err = HandlerError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_errors_are_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(PublishError::QueueFull);
        assert_eq!(err.to_string(), "Outbound queue is full");
    }

    #[test]
    fn test_conn_error_debug_names_variant() {
        let err = ConnError::Refused("bad token".into());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Refused"));
        assert!(debug_str.contains("bad token"));
    }
}
