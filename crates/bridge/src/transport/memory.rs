//! In-process transport for tests and examples.
//!
//! [`MemoryHub`] plays the broker: it routes publishes to every attached
//! transport whose subscription filters match, honoring the usual `+`
//! and `#` wildcard rules. [`MemoryTransport`] implements the transport
//! contract against the hub, so a publisher and a subscriber bridge can
//! talk to each other inside one process with no network at all.
//!
//! The hub's connectivity is switchable. [`MemoryHub::set_online`] with
//! `false` severs every attached session, which makes the reconnect and
//! offline-queueing paths testable with plain tokio time control.
//!
//! At-least-once publishes are acknowledged the moment the hub routes
//! them, mirroring a broker that sends PUBACK on receipt.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::{
    envelope::DeliveryQuality,
    error::ConnError,
    transport::{DeliveryTag, Disposition, Transport, TransportEvent},
};

/// In-process broker shared by any number of [`MemoryTransport`]s.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

struct HubInner {
    online: bool,
    next_client: u64,
    clients: HashMap<u64, ClientSlot>,
}

struct ClientSlot {
    subscriptions: Vec<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                online: true,
                next_client: 0,
                clients: HashMap::new(),
            })),
        }
    }

    /// Creates a transport that will attach to this hub when opened.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            client: None,
            next_tag: 0,
        }
    }

    /// Switches hub connectivity.
    ///
    /// Going offline severs every attached session: each one receives an
    /// `Offline` event with a reconnect disposition, exactly as if the
    /// network had dropped. Going back online lets new `open` calls
    /// succeed again; severed transports must reopen.
    pub async fn set_online(&self, online: bool) {
        let mut inner = self.inner.lock().await;
        inner.online = online;
        if !online {
            for (_, slot) in inner.clients.drain() {
                let _ = slot.events.send(TransportEvent::Offline {
                    reason: ConnError::Dropped("link severed".into()),
                    disposition: Disposition::Reconnect,
                });
            }
        }
    }

    /// How many transports currently hold a live session.
    pub async fn attached_clients(&self) -> usize {
        self.inner.lock().await.clients.len()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Transport`] implementation backed by a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    client: Option<AttachedClient>,
    next_tag: u64,
}

struct AttachedClient {
    id: u64,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<(), ConnError> {
        let mut inner = self.hub.inner.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();

        if inner.online {
            let id = inner.next_client;
            inner.next_client += 1;
            // The hub accepts instantly; the session outcome still
            // arrives through the event stream like any transport.
            let _ = tx.send(TransportEvent::Online);
            inner.clients.insert(
                id,
                ClientSlot {
                    subscriptions: Vec::new(),
                    events: tx,
                },
            );
            self.client = Some(AttachedClient { id, events: rx });
        } else {
            let _ = tx.send(TransportEvent::Offline {
                reason: ConnError::Dropped("hub offline".into()),
                disposition: Disposition::Reconnect,
            });
            self.client = Some(AttachedClient {
                id: u64::MAX,
                events: rx,
            });
        }

        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        quality: DeliveryQuality,
    ) -> Result<Option<DeliveryTag>, ConnError> {
        let client = self.client.as_ref().ok_or(ConnError::Closed)?;
        let inner = self.hub.inner.lock().await;

        let slot = inner
            .clients
            .get(&client.id)
            .ok_or_else(|| ConnError::Dropped("link severed".into()))?;

        for other in inner.clients.values() {
            let matched = other
                .subscriptions
                .iter()
                .any(|filter| filter_matches(filter, topic));
            if matched {
                let _ = other.events.send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }

        match quality {
            DeliveryQuality::AtMostOnce => Ok(None),
            DeliveryQuality::AtLeastOnce => {
                self.next_tag += 1;
                let tag = DeliveryTag(self.next_tag);
                let _ = slot.events.send(TransportEvent::Acked(tag));
                Ok(Some(tag))
            }
        }
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnError> {
        let client = self.client.as_ref().ok_or(ConnError::Closed)?;
        let mut inner = self.hub.inner.lock().await;
        let slot = inner
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| ConnError::Dropped("link severed".into()))?;
        if !slot.subscriptions.iter().any(|existing| existing == filter) {
            slot.subscriptions.push(filter.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), ConnError> {
        let client = self.client.as_ref().ok_or(ConnError::Closed)?;
        let mut inner = self.hub.inner.lock().await;
        let slot = inner
            .clients
            .get_mut(&client.id)
            .ok_or_else(|| ConnError::Dropped("link severed".into()))?;
        slot.subscriptions.retain(|existing| existing != filter);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(client) = self.client.as_mut() else {
            return std::future::pending().await;
        };

        match client.events.recv().await {
            Some(event) => event,
            // Sender gone without an Offline event; nothing more will
            // ever arrive on this session.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ConnError> {
        if let Some(client) = self.client.take() {
            let mut inner = self.hub.inner.lock().await;
            inner.clients.remove(&client.id);
        }
        Ok(())
    }
}

/// MQTT-style filter matching: `+` spans one level, `#` the rest.
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (None, None) => return true,
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            _ => return false,
        }
    }
}
