//! Outbound event queueing and publishing.
//!
//! The `Publisher` is the application-facing handle for sending device events.
//! It handles:
//! - Payload encoding through the codec registry
//! - Topic construction from the event address
//! - Bounded FIFO queueing while the link is down
//! - Acknowledgement tracking for at-least-once events
//!
//! Events are not written to the transport here. The publisher only encodes
//! and enqueues; the connection supervisor drains the queue whenever the
//! session is up. That split is what lets `send` succeed while the broker is
//! unreachable.
//!
//! # Overflow behavior
//!
//! The queue holds at most `queue_capacity` events. When it is full:
//! - an incoming at-most-once event evicts the oldest queued at-most-once
//!   event (or is itself dropped when only at-least-once events are queued),
//!   and `send` still returns `Ok`
//! - an incoming at-least-once event waits for space, up to the publish
//!   timeout, then fails with [`PublishError::QueueFull`]
//!
//! At-least-once events are never evicted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time;
use tracing::debug;

use super::{
    codec::CodecRegistry,
    config::DeviceIdentity,
    envelope::{DeliveryQuality, EventData},
    error::PublishError,
    topic,
    transport::DeliveryTag,
};

/// An event waiting in the outbound queue or on the wire.
struct Pending {
    /// Submission order, strictly increasing per queue.
    seq: u64,
    topic: String,
    payload: Bytes,
    quality: DeliveryQuality,
    /// Present for at-least-once events with a caller still waiting.
    ack_tx: Option<oneshot::Sender<()>>,
    /// Transport delivery tag, set once the event has been handed over.
    tag: Option<DeliveryTag>,
}

/// A queue entry handed to the supervisor for delivery.
///
/// Carries copies of the wire data; the entry itself stays tracked inside the
/// queue until the supervisor reports the outcome via [`OutboundQueue::complete`],
/// [`OutboundQueue::mark_in_flight`], or [`OutboundQueue::requeue`].
pub(crate) struct OutboundItem {
    pub(crate) seq: u64,
    pub(crate) topic: String,
    pub(crate) payload: Bytes,
    pub(crate) quality: DeliveryQuality,
}

/// Counters describing the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Events waiting to be handed to the transport.
    pub queued: usize,

    /// At-least-once events sent but not yet acknowledged.
    pub in_flight: usize,

    /// Best-effort events discarded because the queue was full.
    pub dropped: u64,
}

struct QueueInner {
    entries: VecDeque<Pending>,
    in_flight: Vec<Pending>,
    next_seq: u64,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO queue between publishers and the connection supervisor.
///
/// Publishers push from any task; the supervisor is the only consumer. All
/// state lives behind one lock, with two [`Notify`] handles for the two wait
/// directions (consumer waiting for items, producers waiting for space).
pub(crate) struct OutboundQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    items: Notify,
    space: Notify,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                in_flight: Vec::new(),
                next_seq: 0,
                closed: false,
                dropped: 0,
            }),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Enqueues a best-effort event, evicting if the queue is full.
    ///
    /// Returns `Ok` even when the event (or an older one) was dropped; the
    /// drop is recorded in the stats instead.
    pub(crate) async fn push_at_most_once(
        &self,
        topic: String,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(PublishError::BridgeClosed);
        }

        if inner.entries.len() >= self.capacity {
            // Evict the oldest best-effort event. When every queued event
            // insists on an acknowledgement, the incoming one is dropped
            // instead.
            let oldest = inner
                .entries
                .iter()
                .position(|p| p.quality == DeliveryQuality::AtMostOnce);
            match oldest {
                Some(idx) => {
                    inner.entries.remove(idx);
                    inner.dropped += 1;
                    debug!("Outbound queue full, evicted oldest best-effort event");
                }
                None => {
                    inner.dropped += 1;
                    debug!("Outbound queue full of acknowledged events, dropped incoming event");
                    return Ok(());
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(Pending {
            seq,
            topic,
            payload,
            quality: DeliveryQuality::AtMostOnce,
            ack_tx: None,
            tag: None,
        });
        drop(inner);

        self.items.notify_one();
        Ok(())
    }

    /// Enqueues an at-least-once event, waiting for space if needed.
    ///
    /// Resolves to the receiver that fires once the broker acknowledges the
    /// event. Does not time out on its own; callers bound the wait.
    pub(crate) async fn push_at_least_once(
        &self,
        topic: String,
        payload: Bytes,
    ) -> Result<oneshot::Receiver<()>, PublishError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(PublishError::BridgeClosed);
                }
                if inner.entries.len() < self.capacity {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.entries.push_back(Pending {
                        seq,
                        topic,
                        payload,
                        quality: DeliveryQuality::AtLeastOnce,
                        ack_tx: Some(ack_tx),
                        tag: None,
                    });
                    drop(inner);

                    self.items.notify_one();
                    return Ok(ack_rx);
                }
            }

            self.space.notified().await;
        }
    }

    /// Takes the next event for delivery, moving it into the in-flight set.
    ///
    /// The supervisor must follow up with [`complete`](Self::complete),
    /// [`mark_in_flight`](Self::mark_in_flight), or [`requeue`](Self::requeue)
    /// once the transport call resolves.
    pub(crate) async fn pop_ready(&self) -> Option<OutboundItem> {
        let mut inner = self.inner.lock().await;
        let pending = inner.entries.pop_front()?;
        let item = OutboundItem {
            seq: pending.seq,
            topic: pending.topic.clone(),
            payload: pending.payload.clone(),
            quality: pending.quality,
        };
        inner.in_flight.push(pending);
        drop(inner);

        self.space.notify_one();
        Some(item)
    }

    /// Forgets a delivered event that needs no acknowledgement.
    pub(crate) async fn complete(&self, seq: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(idx) = inner.in_flight.iter().position(|p| p.seq == seq) {
            inner.in_flight.remove(idx);
        }
    }

    /// Records the transport delivery tag for an in-flight event.
    pub(crate) async fn mark_in_flight(&self, seq: u64, tag: DeliveryTag) {
        let mut inner = self.inner.lock().await;
        if let Some(pending) = inner.in_flight.iter_mut().find(|p| p.seq == seq) {
            pending.tag = Some(tag);
        }
    }

    /// Puts an event back at the head of the queue after a failed handover.
    pub(crate) async fn requeue(&self, seq: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(idx) = inner.in_flight.iter().position(|p| p.seq == seq) {
            let mut pending = inner.in_flight.remove(idx);
            pending.tag = None;
            inner.entries.push_front(pending);
        }
    }

    /// Resolves an acknowledgement from the transport.
    ///
    /// Returns `false` when the tag matches nothing, which can happen after a
    /// reconnect if an acknowledgement from the old session straggles in.
    pub(crate) async fn acknowledge(&self, tag: DeliveryTag) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.in_flight.iter().position(|p| p.tag == Some(tag)) else {
            return false;
        };
        let mut pending = inner.in_flight.remove(idx);
        if let Some(ack_tx) = pending.ack_tx.take() {
            // The waiter may have timed out and gone away; delivery still
            // counts.
            let _ = ack_tx.send(());
        }
        true
    }

    /// Returns all unacknowledged events to the head of the queue.
    ///
    /// Called when the session drops. Entries go back in submission order so
    /// redelivery after reconnect preserves the original ordering. Returns
    /// how many events were requeued.
    pub(crate) async fn requeue_in_flight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let returned: Vec<Pending> = inner.in_flight.drain(..).collect();
        let count = returned.len();
        // in_flight is held in pop order (ascending seq); pushing front in
        // reverse keeps the queue head sorted by submission.
        for mut pending in returned.into_iter().rev() {
            pending.tag = None;
            inner.entries.push_front(pending);
        }
        count
    }

    /// Closes the queue and discards everything in it.
    ///
    /// Blocked producers wake up with [`PublishError::BridgeClosed`]; waiting
    /// acknowledgement futures resolve as cancelled.
    pub(crate) async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.entries.clear();
        inner.in_flight.clear();
        drop(inner);

        self.space.notify_waiters();
        self.items.notify_waiters();
    }

    /// Waits until at least one event has been enqueued.
    ///
    /// A wakeup is a hint, not a guarantee; callers re-check with
    /// [`pop_ready`](Self::pop_ready).
    pub(crate) async fn wait_ready(&self) {
        self.items.notified().await;
    }

    pub(crate) async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            queued: inner.entries.len(),
            in_flight: inner.in_flight.len(),
            dropped: inner.dropped,
        }
    }
}

/// Application-facing handle for sending device events.
///
/// Encodes the payload, builds the event topic, and enqueues the result for
/// the connection supervisor to deliver. The handle can be cloned and shared
/// across tasks; all clones feed the same queue.
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<OutboundQueue>,
    codecs: Arc<CodecRegistry>,
    identity: Option<DeviceIdentity>,
    publish_timeout: Duration,
}

impl Publisher {
    pub(crate) fn new(
        queue: Arc<OutboundQueue>,
        codecs: Arc<CodecRegistry>,
        identity: Option<DeviceIdentity>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            codecs,
            identity,
            publish_timeout,
        }
    }

    /// Sends an event as the bridge's own device identity.
    ///
    /// Only available on bridges configured with a device identity;
    /// application bridges publish on behalf of a device with
    /// [`send_as`](Self::send_as).
    ///
    /// # Arguments
    /// - `event_name`: Event name, e.g. "status" or "greeting"
    /// - `data`: Event payload
    /// - `encoding`: Codec tag, e.g. "json" or "raw"
    /// - `quality`: Delivery quality for this event
    ///
    /// # Returns
    /// - `Ok(())`: Event accepted (at-most-once) or acknowledged
    ///   (at-least-once)
    /// - `Err(PublishError)`: Encoding failed, the queue rejected the event,
    ///   or the acknowledgement did not arrive in time
    ///
    /// # Examples
    /// ```ignore
    /// let data = EventData::json(&serde_json::json!({ "temp": 22.5 }))?;
    /// publisher
    ///     .send("status", &data, "json", DeliveryQuality::AtMostOnce)
    ///     .await?;
    /// ```
    pub async fn send(
        &self,
        event_name: &str,
        data: &EventData,
        encoding: &str,
        quality: DeliveryQuality,
    ) -> Result<(), PublishError> {
        let Some(identity) = &self.identity else {
            return Err(PublishError::MissingIdentity);
        };
        self.send_as(
            &identity.device_type,
            &identity.device_id,
            event_name,
            data,
            encoding,
            quality,
        )
        .await
    }

    /// Sends an event on behalf of an explicit device address.
    ///
    /// This is the full form of [`send`](Self::send); application bridges use
    /// it to publish events for devices they represent.
    ///
    /// # Arguments
    /// - `device_type`: Device type of the event source
    /// - `device_id`: Device id of the event source
    /// - `event_name`: Event name
    /// - `data`: Event payload
    /// - `encoding`: Codec tag the payload is encoded with
    /// - `quality`: Delivery quality for this event
    pub async fn send_as(
        &self,
        device_type: &str,
        device_id: &str,
        event_name: &str,
        data: &EventData,
        encoding: &str,
        quality: DeliveryQuality,
    ) -> Result<(), PublishError> {
        let payload = self.codecs.encode(encoding, data)?;
        let topic = topic::event_topic(device_type, device_id, event_name, encoding);

        debug!(
            "Queueing '{}' event for {}/{}: {} bytes ({})",
            event_name,
            device_type,
            device_id,
            payload.len(),
            quality,
        );

        match quality {
            DeliveryQuality::AtMostOnce => {
                self.queue
                    .push_at_most_once(topic, Bytes::from(payload))
                    .await
            }
            DeliveryQuality::AtLeastOnce => {
                // Two bounded waits: one for queue space, one for the broker
                // acknowledgement. An event that makes it into the queue stays
                // there even if the caller stops waiting.
                let enqueue = self.queue.push_at_least_once(topic, Bytes::from(payload));
                let ack_rx = match time::timeout(self.publish_timeout, enqueue).await {
                    Ok(pushed) => pushed?,
                    Err(_) => return Err(PublishError::QueueFull),
                };

                match time::timeout(self.publish_timeout, ack_rx).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(PublishError::BridgeClosed),
                    Err(_) => Err(PublishError::Timeout),
                }
            }
        }
    }

    /// Serializes a value to JSON and sends it as an event.
    ///
    /// Convenience wrapper over [`send`](Self::send) with the "json" codec.
    ///
    /// # Examples
    /// ```ignore
    /// #[derive(Serialize)]
    /// struct Reading { temperature: f32 }
    ///
    /// publisher
    ///     .send_json("reading", &Reading { temperature: 21.0 }, DeliveryQuality::AtLeastOnce)
    ///     .await?;
    /// ```
    pub async fn send_json<T: Serialize>(
        &self,
        event_name: &str,
        value: &T,
        quality: DeliveryQuality,
    ) -> Result<(), PublishError> {
        let data = EventData::json(value)?;
        self.send(event_name, &data, "json", quality).await
    }

    /// Serializes a value to JSON and sends it for an explicit device address.
    pub async fn send_json_as<T: Serialize>(
        &self,
        device_type: &str,
        device_id: &str,
        event_name: &str,
        value: &T,
        quality: DeliveryQuality,
    ) -> Result<(), PublishError> {
        let data = EventData::json(value)?;
        self.send_as(device_type, device_id, event_name, &data, "json", quality)
            .await
    }

    /// Current queue counters.
    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_publisher(capacity: usize) -> (Publisher, Arc<OutboundQueue>) {
        let queue = Arc::new(OutboundQueue::new(capacity));
        let publisher = Publisher::new(
            Arc::clone(&queue),
            Arc::new(CodecRegistry::with_defaults()),
            Some(DeviceIdentity {
                device_type: "sensor".to_string(),
                device_id: "living-room".to_string(),
            }),
            Duration::from_secs(1),
        );
        (publisher, queue)
    }

    #[tokio::test]
    async fn test_send_rejects_unknown_encoding_without_queueing() {
        let (publisher, queue) = test_publisher(4);
        let data = EventData::json(&serde_json::json!({ "v": 1 })).unwrap();

        let result = publisher
            .send("status", &data, "protobuf", DeliveryQuality::AtMostOnce)
            .await;

        assert!(matches!(result, Err(PublishError::EncodingFailed(_))));
        assert_eq!(queue.stats().await.queued, 0);
    }

    #[tokio::test]
    async fn test_send_without_device_identity_fails() {
        let queue = Arc::new(OutboundQueue::new(4));
        let publisher = Publisher::new(
            Arc::clone(&queue),
            Arc::new(CodecRegistry::with_defaults()),
            None,
            Duration::from_secs(1),
        );

        let result = publisher
            .send_json("status", &serde_json::json!(1), DeliveryQuality::AtMostOnce)
            .await;

        assert!(matches!(result, Err(PublishError::MissingIdentity)));
    }

    #[tokio::test]
    async fn test_at_most_once_send_queues_and_returns() {
        let (publisher, queue) = test_publisher(4);

        publisher
            .send_json("status", &serde_json::json!({ "v": 1 }), DeliveryQuality::AtMostOnce)
            .await
            .unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.dropped, 0);

        let item = queue.pop_ready().await.unwrap();
        assert_eq!(item.topic, "iot/type/sensor/id/living-room/evt/status/fmt/json");
        assert_eq!(item.quality, DeliveryQuality::AtMostOnce);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest_best_effort() {
        let (publisher, queue) = test_publisher(2);

        for name in ["first", "second", "third"] {
            publisher
                .send_json(name, &serde_json::json!(1), DeliveryQuality::AtMostOnce)
                .await
                .unwrap();
        }

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 1);

        // "first" was evicted; "second" and "third" survive in order.
        let a = queue.pop_ready().await.unwrap();
        let b = queue.pop_ready().await.unwrap();
        assert!(a.topic.contains("/evt/second/"));
        assert!(b.topic.contains("/evt/third/"));
    }

    #[tokio::test]
    async fn test_full_queue_of_acknowledged_events_drops_incoming_best_effort() {
        let (publisher, queue) = test_publisher(1);

        queue
            .push_at_least_once("iot/x".to_string(), Bytes::from_static(b"1"))
            .await
            .unwrap();

        publisher
            .send_json("extra", &serde_json::json!(1), DeliveryQuality::AtMostOnce)
            .await
            .unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.dropped, 1);

        // The queued at-least-once event is untouched.
        let item = queue.pop_ready().await.unwrap();
        assert_eq!(item.topic, "iot/x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_least_once_send_resolves_on_acknowledgement() {
        let (publisher, queue) = test_publisher(4);

        let sender = tokio::spawn(async move {
            publisher
                .send_json("reading", &serde_json::json!(42), DeliveryQuality::AtLeastOnce)
                .await
        });

        // Play the supervisor: take the event, tag it, acknowledge it.
        let item = loop {
            match queue.pop_ready().await {
                Some(item) => break item,
                None => tokio::task::yield_now().await,
            }
        };
        assert_eq!(item.quality, DeliveryQuality::AtLeastOnce);
        queue.mark_in_flight(item.seq, DeliveryTag(7)).await;
        assert!(queue.acknowledge(DeliveryTag(7)).await);

        sender.await.unwrap().unwrap();
        assert_eq!(queue.stats().await.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_least_once_timeout_leaves_event_queued() {
        let (publisher, queue) = test_publisher(4);

        let result = publisher
            .send_json("reading", &serde_json::json!(42), DeliveryQuality::AtLeastOnce)
            .await;

        assert!(matches!(result, Err(PublishError::Timeout)));
        // The caller gave up but the event still awaits delivery.
        assert_eq!(queue.stats().await.queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_at_least_once_times_out_with_queue_full() {
        let (publisher, queue) = test_publisher(1);

        queue
            .push_at_least_once("iot/x".to_string(), Bytes::from_static(b"1"))
            .await
            .unwrap();

        let result = publisher
            .send_json("reading", &serde_json::json!(42), DeliveryQuality::AtLeastOnce)
            .await;

        assert!(matches!(result, Err(PublishError::QueueFull)));
        assert_eq!(queue.stats().await.queued, 1);
    }

    #[tokio::test]
    async fn test_blocked_sender_proceeds_when_space_opens() {
        let (publisher, queue) = test_publisher(1);

        queue
            .push_at_least_once("iot/x".to_string(), Bytes::from_static(b"1"))
            .await
            .unwrap();

        let blocked = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .push_at_least_once("iot/y".to_string(), Bytes::from_static(b"2"))
                    .await
            }
        });
        tokio::task::yield_now().await;

        // Draining the head frees a slot for the blocked producer.
        let item = queue.pop_ready().await.unwrap();
        assert_eq!(item.topic, "iot/x");

        blocked.await.unwrap().unwrap();
        assert_eq!(queue.stats().await.queued, 1);
        drop(publisher);
    }

    #[tokio::test]
    async fn test_requeue_in_flight_restores_submission_order() {
        let (_publisher, queue) = test_publisher(4);

        let _rx_a = queue
            .push_at_least_once("iot/a".to_string(), Bytes::from_static(b"a"))
            .await
            .unwrap();
        let _rx_b = queue
            .push_at_least_once("iot/b".to_string(), Bytes::from_static(b"b"))
            .await
            .unwrap();

        let a = queue.pop_ready().await.unwrap();
        let b = queue.pop_ready().await.unwrap();
        queue.mark_in_flight(a.seq, DeliveryTag(1)).await;
        queue.mark_in_flight(b.seq, DeliveryTag(2)).await;

        assert_eq!(queue.requeue_in_flight().await, 2);

        let first = queue.pop_ready().await.unwrap();
        let second = queue.pop_ready().await.unwrap();
        assert_eq!(first.topic, "iot/a");
        assert_eq!(second.topic, "iot/b");
    }

    #[tokio::test]
    async fn test_requeue_after_failed_handover_keeps_event_first() {
        let (_publisher, queue) = test_publisher(4);

        queue
            .push_at_most_once("iot/a".to_string(), Bytes::from_static(b"a"))
            .await
            .unwrap();
        queue
            .push_at_most_once("iot/b".to_string(), Bytes::from_static(b"b"))
            .await
            .unwrap();

        let item = queue.pop_ready().await.unwrap();
        queue.requeue(item.seq).await;

        let again = queue.pop_ready().await.unwrap();
        assert_eq!(again.topic, "iot/a");
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_tag_returns_false() {
        let (_publisher, queue) = test_publisher(4);
        assert!(!queue.acknowledge(DeliveryTag(99)).await);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_wakes_waiters() {
        let (publisher, queue) = test_publisher(4);

        let waiting = tokio::spawn({
            let publisher = publisher.clone();
            async move {
                publisher
                    .send_json("reading", &serde_json::json!(1), DeliveryQuality::AtLeastOnce)
                    .await
            }
        });
        tokio::task::yield_now().await;

        queue.close().await;

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(PublishError::BridgeClosed)));

        let result = publisher
            .send_json("reading", &serde_json::json!(1), DeliveryQuality::AtMostOnce)
            .await;
        assert!(matches!(result, Err(PublishError::BridgeClosed)));
    }
}
