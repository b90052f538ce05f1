//! Transport seam between the supervisor and the wire.
//!
//! The supervisor owns exactly one [`Transport`] and is the only code
//! that calls it. Everything above the supervisor works with queues and
//! watch channels, never with the transport directly, which is what
//! keeps the single-writer discipline trivially true.
//!
//! Two implementations ship with the crate: [`mqtt::MqttTransport`] for
//! real brokers and [`memory::MemoryTransport`] for tests and examples
//! that need to run without a network.

pub mod memory;
pub mod mqtt;

use async_trait::async_trait;
use bytes::Bytes;

use super::{envelope::DeliveryQuality, error::ConnError};

/// Correlation token for one acknowledged publish.
///
/// Returned by [`Transport::publish`] for deliveries that will be
/// confirmed, and echoed back through [`TransportEvent::Acked`] when the
/// confirmation arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// How the supervisor should react to a session drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Configuration, credential or protocol problem. Retrying would
    /// fail the same way, so the supervisor gives up.
    Fatal,
    /// Transient failure. The supervisor reconnects with backoff.
    Reconnect,
}

/// Something the transport needs the supervisor to know.
#[derive(Debug)]
pub enum TransportEvent {
    /// The session is established; traffic can flow.
    Online,

    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },

    /// The peer confirmed the publish issued under this tag.
    Acked(DeliveryTag),

    /// The session dropped or could not be established.
    Offline {
        reason: ConnError,
        disposition: Disposition,
    },
}

/// A connection to one message broker.
///
/// Implementations are state machines driven by a single caller. `open`
/// starts a session attempt; the outcome arrives through [`Self::next_event`]
/// as either `Online` or `Offline`. After an `Offline` the caller may
/// call `open` again to start a fresh attempt.
#[async_trait]
pub trait Transport: Send {
    /// Starts a session attempt. Establishment completes asynchronously:
    /// the transport reports [`TransportEvent::Online`] once traffic can
    /// flow, or [`TransportEvent::Offline`] if the attempt fails.
    async fn open(&mut self) -> Result<(), ConnError>;

    /// Sends one payload.
    ///
    /// For [`DeliveryQuality::AtLeastOnce`] the returned tag is later
    /// confirmed through [`TransportEvent::Acked`]. `AtMostOnce`
    /// publishes return `None` and are never confirmed.
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        quality: DeliveryQuality,
    ) -> Result<Option<DeliveryTag>, ConnError>;

    /// Registers interest in a topic filter.
    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnError>;

    /// Registers a batch of filters, used when re-arming subscriptions
    /// after a reconnect. Implementations with a native batch operation
    /// should override this.
    async fn subscribe_all(&mut self, filters: &[String]) -> Result<(), ConnError> {
        for filter in filters {
            self.subscribe(filter).await?;
        }
        Ok(())
    }

    /// Drops interest in a topic filter.
    async fn unsubscribe(&mut self, filter: &str) -> Result<(), ConnError>;

    /// Waits for the next event. Cancel-safe; the supervisor polls this
    /// inside `select!` together with its other wakeup sources.
    async fn next_event(&mut self) -> TransportEvent;

    /// Tears the current session down. Idempotent.
    async fn close(&mut self) -> Result<(), ConnError>;
}
