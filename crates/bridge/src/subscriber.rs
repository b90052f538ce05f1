//! Inbound event subscription and dispatch.
//!
//! The `Subscriber` is the application-facing handle for receiving device
//! events. It handles:
//! - Subscription registration with device and event filters
//! - Payload decoding through the codec registry
//! - Serial, in-order dispatch to the first matching handler
//! - Per-handler timeouts so one stuck callback cannot wedge the bridge
//!
//! Registrations take effect immediately when the bridge is connected and are
//! replayed automatically after every reconnect, so handlers can be installed
//! before the first session is up.
//!
//! # Matching
//!
//! Each inbound event goes to exactly one handler: the first registered one
//! whose [`SubscriptionSpec`] matches the event's address. Later matching
//! registrations are not called. Events matching no registration are counted
//! and discarded.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time;
use tracing::{debug, warn};

use super::{
    codec::CodecRegistry,
    envelope::{EventData, EventEnvelope},
    error::HandlerError,
    topic::{self, SubscriptionSpec},
};

/// Result type returned by event handlers.
///
/// Handlers report failures with any boxed error; the bridge logs and counts
/// them without retrying the event.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A callback invoked for inbound events.
///
/// Implement this trait for stateful handlers; plain closures can go through
/// [`Subscriber::register_fn`] instead.
///
/// Handlers run one at a time in arrival order. A handler that fails or times
/// out only loses its own event; dispatch continues with the next one.
///
/// # Examples
/// ```ignore
/// struct Recorder;
///
/// #[async_trait]
/// impl EventHandler for Recorder {
///     async fn handle(&self, envelope: &EventEnvelope, data: &EventData) -> HandlerResult {
///         println!("{} from {}: {:?}", envelope.event_name, envelope.device_id, data);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one inbound event.
    async fn handle(&self, envelope: &EventEnvelope, data: &EventData) -> HandlerResult;
}

/// Adapter that lets async closures act as event handlers.
struct FnHandler<F> {
    inner: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope, EventData) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, envelope: &EventEnvelope, data: &EventData) -> HandlerResult {
        (self.inner)(envelope.clone(), data.clone()).await
    }
}

/// Identifies one handler registration.
///
/// Returned by the register methods; pass it to
/// [`Subscriber::unregister`] to remove the registration again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    spec: SubscriptionSpec,
    handler: Arc<dyn EventHandler>,
}

/// Counters describing inbound dispatch since the bridge started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events delivered to a handler that returned `Ok`.
    pub dispatched: u64,

    /// Events with no matching registration, or on unrecognized topics.
    pub unmatched: u64,

    /// Events whose payload the codec rejected.
    pub decode_failures: u64,

    /// Events whose handler failed or timed out.
    pub handler_failures: u64,
}

#[derive(Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    unmatched: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
}

/// A message pulled off the wire, waiting for dispatch.
pub(crate) struct InboundMessage {
    pub(crate) topic: String,
    pub(crate) payload: Bytes,
}

/// Application-facing handle for registering event handlers.
///
/// Can be cloned and shared across tasks; all clones see the same
/// registrations. The connection supervisor watches the registration set and
/// keeps the broker subscriptions in sync with it.
#[derive(Clone)]
pub struct Subscriber {
    registrations: Arc<RwLock<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
    changes: Arc<Notify>,
    counters: Arc<DispatchCounters>,
    codecs: Arc<CodecRegistry>,
    handler_timeout: Duration,
}

impl Subscriber {
    pub(crate) fn new(codecs: Arc<CodecRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registrations: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            changes: Arc::new(Notify::new()),
            counters: Arc::new(DispatchCounters::default()),
            codecs,
            handler_timeout,
        }
    }

    /// Registers a handler for events matching the given spec.
    ///
    /// Earlier registrations win when several specs match the same event, so
    /// register specific handlers before catch-all ones.
    ///
    /// # Arguments
    /// - `spec`: Which device events to receive
    /// - `handler`: Callback invoked for each matching event
    ///
    /// # Returns
    /// - `HandlerId`: Token for removing the registration later
    ///
    /// # Examples
    /// ```ignore
    /// let id = subscriber
    ///     .register(SubscriptionSpec::for_device("sensor", "living-room"), Recorder)
    ///     .await;
    /// ```
    pub async fn register<H>(&self, spec: SubscriptionSpec, handler: H) -> HandlerId
    where
        H: EventHandler + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registrations = self.registrations.write().await;
        registrations.push(Registration {
            id,
            spec,
            handler: Arc::new(handler),
        });
        drop(registrations);

        self.changes.notify_one();
        id
    }

    /// Registers an async closure for events matching the given spec.
    ///
    /// The closure receives owned copies of the envelope and decoded data.
    ///
    /// # Examples
    /// ```ignore
    /// subscriber
    ///     .register_fn(SubscriptionSpec::any(), |envelope, data| async move {
    ///         println!("{}: {:?}", envelope.event_name, data);
    ///         Ok(())
    ///     })
    ///     .await;
    /// ```
    pub async fn register_fn<F, Fut>(&self, spec: SubscriptionSpec, handler: F) -> HandlerId
    where
        F: Fn(EventEnvelope, EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(spec, FnHandler { inner: handler }).await
    }

    /// Removes a registration.
    ///
    /// Returns `false` when the id is unknown, which includes registrations
    /// already removed.
    pub async fn unregister(&self, id: HandlerId) -> bool {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        drop(registrations);

        if removed {
            self.changes.notify_one();
        }
        removed
    }

    /// Dispatch counters since the bridge started.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// The broker topic filters the current registrations need, in
    /// first-registration order and deduplicated. The supervisor applies
    /// them in this order after every reconnect.
    pub(crate) async fn topic_filters(&self) -> Vec<String> {
        let registrations = self.registrations.read().await;
        let mut seen = HashSet::new();
        let mut filters = Vec::new();
        for registration in registrations.iter() {
            let filter = registration.spec.to_topic_filter();
            if seen.insert(filter.clone()) {
                filters.push(filter);
            }
        }
        filters
    }

    /// Waits until the registration set changes.
    pub(crate) async fn changed(&self) {
        self.changes.notified().await;
    }

    /// Decodes one wire message and runs the first matching handler.
    pub(crate) async fn dispatch(&self, topic: &str, payload: Bytes) {
        let Some(address) = topic::parse_event_topic(topic) else {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!("Ignoring message on unrecognized topic '{}'", topic);
            return;
        };

        let matched = {
            let registrations = self.registrations.read().await;
            registrations
                .iter()
                .find(|r| r.spec.matches(&address))
                .map(|r| (r.id, Arc::clone(&r.handler)))
        };
        let Some((id, handler)) = matched else {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                "No handler for '{}' events from {}/{}",
                address.event_name, address.device_type, address.device_id,
            );
            return;
        };

        let data = match self.codecs.decode(&address.encoding, &payload) {
            Ok(data) => data,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Discarding '{}' event from {}/{}: {}",
                    address.event_name, address.device_type, address.device_id, e,
                );
                return;
            }
        };

        let envelope = EventEnvelope::new(
            address.device_type,
            address.device_id,
            address.event_name,
            address.encoding,
            payload,
        );

        match time::timeout(self.handler_timeout, handler.handle(&envelope, &data)).await {
            Ok(Ok(())) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                let report = HandlerError::Failed(e.to_string());
                warn!(
                    "Handler {:?} failed on '{}' event: {}",
                    id, envelope.event_name, report,
                );
            }
            Err(_) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                let report = HandlerError::Timeout(self.handler_timeout);
                warn!(
                    "Handler {:?} failed on '{}' event: {}",
                    id, envelope.event_name, report,
                );
            }
        }
    }
}

/// Pumps wire messages from the supervisor into handler dispatch.
///
/// Runs until the supervisor drops its sending side. Dispatch is strictly
/// serial; the channel provides the buffer between network reads and slow
/// handlers.
pub(crate) async fn run_dispatcher(
    subscriber: Subscriber,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) {
    while let Some(message) = inbound_rx.recv().await {
        subscriber.dispatch(&message.topic, message.payload).await;
    }
    debug!("Inbound dispatcher stopped");
}
