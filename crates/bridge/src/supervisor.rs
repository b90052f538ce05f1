//! Connection lifecycle management.
//!
//! The `ConnectionSupervisor` owns the transport and drives it through one
//! cycle, over and over:
//!
//! 1. Dial the broker and wait for the session to come up
//! 2. Replay subscription filters, then announce `Connected`
//! 3. Serve traffic: drain the outbound queue, feed inbound messages to
//!    the dispatcher, resolve acknowledgements
//! 4. On failure, consult the disposition: fatal errors stop the bridge,
//!    everything else backs off and redials
//!
//! Applications never touch the supervisor directly. [`Bridge::connect`]
//! spawns it in the background and hands back clonable [`Publisher`] and
//! [`Subscriber`] handles plus a watch channel for connection state.

use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backoff::Backoff,
    codec::CodecRegistry,
    config::BridgeConfig,
    error::ConnError,
    publisher::{OutboundQueue, Publisher},
    state::ConnectionState,
    subscriber::{run_dispatcher, InboundMessage, Subscriber},
    transport::{mqtt::MqttTransport, Disposition, Transport, TransportEvent},
};

/// Buffer between the supervisor's network reads and handler dispatch.
const INBOUND_BUFFER: usize = 256;

/// Why a session (or a connection attempt) ended.
enum Interruption {
    /// Shutdown was requested through the cancellation token.
    Shutdown,

    /// The transport failed. The disposition decides whether the
    /// supervisor backs off and redials or gives up.
    Failure {
        reason: ConnError,
        disposition: Disposition,
    },
}

/// Background task that keeps one transport session alive.
struct ConnectionSupervisor {
    transport: Box<dyn Transport>,
    connect_timeout: Duration,
    queue: Arc<OutboundQueue>,
    subscriber: Subscriber,
    inbound_tx: mpsc::Sender<InboundMessage>,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Backoff,
    cancel: CancellationToken,

    /// Filters applied on the current session, in registration order.
    active_filters: Vec<String>,
}

impl ConnectionSupervisor {
    /// Runs the reconnect cycle until shutdown or a fatal failure, then
    /// tears everything down.
    async fn run(mut self) -> Result<(), ConnError> {
        let result = self.supervise().await;

        self.queue.close().await;
        if let Err(e) = self.transport.close().await {
            debug!("Transport close during shutdown: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);

        match &result {
            Ok(()) => info!("Connection supervisor stopped"),
            Err(reason) => error!("Connection supervisor stopped: {}", reason),
        }
        result
    }

    async fn supervise(&mut self) -> Result<(), ConnError> {
        loop {
            self.set_state(ConnectionState::Connecting);

            let interruption = match self.dial().await {
                Ok(()) => {
                    self.on_connected().await;
                    self.serve().await
                }
                Err(interruption) => interruption,
            };

            match interruption {
                Interruption::Shutdown => return Ok(()),
                Interruption::Failure {
                    reason,
                    disposition,
                } => {
                    if let Err(e) = self.transport.close().await {
                        debug!("Transport close after failure: {}", e);
                    }
                    let requeued = self.queue.requeue_in_flight().await;
                    if requeued > 0 {
                        debug!("Returned {} unacknowledged event(s) to the queue", requeued);
                    }

                    match disposition {
                        Disposition::Fatal => {
                            error!("Unrecoverable connection failure: {}", reason);
                            return Err(reason);
                        }
                        Disposition::Reconnect => {
                            if !self.wait_backoff(reason).await? {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Opens the transport and waits for the session to come up.
    ///
    /// Open errors are config problems (bad TLS material and the like),
    /// so they carry a fatal disposition. Everything after that arrives
    /// through the event stream with its own disposition.
    async fn dial(&mut self) -> Result<(), Interruption> {
        if let Err(reason) = self.transport.open().await {
            return Err(Interruption::Failure {
                reason,
                disposition: Disposition::Fatal,
            });
        }

        let deadline = time::sleep(self.connect_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Interruption::Shutdown),

                _ = &mut deadline => {
                    return Err(Interruption::Failure {
                        reason: ConnError::Timeout,
                        disposition: Disposition::Reconnect,
                    });
                }

                event = self.transport.next_event() => match event {
                    TransportEvent::Online => return Ok(()),
                    TransportEvent::Offline { reason, disposition } => {
                        return Err(Interruption::Failure { reason, disposition });
                    }
                    other => debug!("Ignoring pre-session transport event: {:?}", other),
                },
            }
        }
    }

    /// Brings a fresh session into service.
    ///
    /// Filters are re-applied before the state flips to `Connected`, so
    /// anyone watching the state can rely on subscriptions being armed.
    async fn on_connected(&mut self) {
        self.backoff.reset();

        let filters = self.subscriber.topic_filters().await;
        if !filters.is_empty() {
            match self.transport.subscribe_all(&filters).await {
                Ok(()) => info!("Armed {} subscription filter(s)", filters.len()),
                Err(e) => {
                    warn!("Subscription replay failed (retried on reconnect): {}", e)
                }
            }
        }
        self.active_filters = filters;

        self.set_state(ConnectionState::Connected);
        info!("Connection established");
    }

    /// Serves one live session until it is interrupted.
    async fn serve(&mut self) -> Interruption {
        loop {
            self.flush_outbound().await;

            tokio::select! {
                _ = self.cancel.cancelled() => return Interruption::Shutdown,

                event = self.transport.next_event() => match event {
                    TransportEvent::Message { topic, payload } => {
                        let message = InboundMessage { topic, payload };
                        if self.inbound_tx.send(message).await.is_err() {
                            return Interruption::Shutdown;
                        }
                    }
                    TransportEvent::Acked(tag) => {
                        if !self.queue.acknowledge(tag).await {
                            debug!("Acknowledgement for unknown delivery {:?}", tag);
                        }
                    }
                    TransportEvent::Offline { reason, disposition } => {
                        return Interruption::Failure { reason, disposition };
                    }
                    TransportEvent::Online => debug!("Ignoring duplicate online event"),
                },

                _ = self.subscriber.changed() => self.sync_subscriptions().await,

                // New outbound events; the flush at the top of the loop
                // picks them up.
                _ = self.queue.wait_ready() => {}
            }
        }
    }

    /// Hands queued events to the transport in submission order.
    ///
    /// Stops at the first handover failure and puts the event back at
    /// the head; the session is dying and the offline event that follows
    /// takes care of the rest.
    async fn flush_outbound(&mut self) {
        while let Some(item) = self.queue.pop_ready().await {
            let handover = self
                .transport
                .publish(&item.topic, item.payload.clone(), item.quality)
                .await;

            match handover {
                Ok(Some(tag)) => self.queue.mark_in_flight(item.seq, tag).await,
                Ok(None) => self.queue.complete(item.seq).await,
                Err(e) => {
                    debug!("Handover of queued event failed, keeping it queued: {}", e);
                    self.queue.requeue(item.seq).await;
                    return;
                }
            }
        }
    }

    /// Reconciles broker subscriptions with the current registrations.
    async fn sync_subscriptions(&mut self) {
        let wanted = self.subscriber.topic_filters().await;

        let added: Vec<String> = wanted
            .iter()
            .filter(|filter| !self.active_filters.contains(filter))
            .cloned()
            .collect();
        let removed: Vec<String> = self
            .active_filters
            .iter()
            .filter(|filter| !wanted.contains(filter))
            .cloned()
            .collect();

        for filter in &added {
            match self.transport.subscribe(filter).await {
                Ok(()) => debug!("Subscribed to {}", filter),
                Err(e) => warn!("Subscribe to {} failed (retried on reconnect): {}", filter, e),
            }
        }
        for filter in &removed {
            if let Err(e) = self.transport.unsubscribe(filter).await {
                warn!("Unsubscribe from {} failed: {}", filter, e);
            }
        }

        self.active_filters = wanted;
    }

    /// Sleeps out the next backoff delay.
    ///
    /// Returns `Ok(false)` when shutdown interrupted the wait, and an
    /// exhaustion error once the attempt bound is spent.
    async fn wait_backoff(&mut self, reason: ConnError) -> Result<bool, ConnError> {
        let Some(delay) = self.backoff.next_delay() else {
            let attempts = self.backoff.attempts_made();
            error!("Giving up after {} failed connection attempts", attempts);
            return Err(ConnError::Exhausted(attempts));
        };

        warn!(
            "Connection lost ({}); retrying in {:.1}s",
            reason,
            delay.as_secs_f64(),
        );
        self.set_state(ConnectionState::Backoff { retry_in: delay });

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(false),
            _ = time::sleep(delay) => Ok(true),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Connection state: {} -> {}", state, next);
            *state = next;
            true
        });
    }
}

/// Background tasks owned by a [`Bridge`].
struct Tasks {
    supervisor: JoinHandle<Result<(), ConnError>>,
    dispatcher: JoinHandle<()>,
}

/// A running connection to the event broker.
///
/// Created with [`Bridge::connect`] (or [`Bridge::builder`] for custom
/// codecs and transports). The bridge owns the background tasks that keep
/// the session alive; applications interact through the [`Publisher`] and
/// [`Subscriber`] handles and the state watch.
///
/// Once connected, the bridge stays up on its own: it redials with
/// exponential backoff after network failures, replays subscriptions on
/// every new session, and flushes events queued while offline. It only
/// stops for [`Bridge::shutdown`] or an unrecoverable failure such as
/// rejected credentials.
///
/// # Examples
/// ```ignore
/// let config = BridgeConfig::from_file("/etc/hivelink/config.toml")?;
/// let bridge = Bridge::connect(config).await?;
///
/// let publisher = bridge.publisher();
/// publisher
///     .send_json("boot", &serde_json::json!({ "ok": true }), DeliveryQuality::AtLeastOnce)
///     .await?;
///
/// bridge.shutdown().await;
/// ```
pub struct Bridge {
    publisher: Publisher,
    subscriber: Subscriber,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Connects to the broker described by the config.
    ///
    /// Resolves once the first session is up, with subscriptions armed
    /// and the outbound queue flowing. If the broker cannot be reached,
    /// the supervisor keeps retrying under the configured backoff policy;
    /// this method only fails once the failure is final (an exhausted
    /// attempt bound, rejected credentials, bad TLS material).
    ///
    /// # Arguments
    /// - `config`: Validated bridge configuration
    ///
    /// # Returns
    /// - `Ok(Bridge)`: Connected and ready to use
    /// - `Err(ConnError)`: The connection failed for good
    ///
    /// # Examples
    /// ```ignore
    /// let bridge = Bridge::connect(config).await?;
    /// println!("connected: {}", bridge.current_state());
    /// ```
    pub async fn connect(config: BridgeConfig) -> Result<Self, ConnError> {
        Self::builder(config).connect().await
    }

    /// Starts building a bridge with non-default parts.
    ///
    /// # Examples
    /// ```ignore
    /// let bridge = Bridge::builder(config)
    ///     .codecs(custom_registry)
    ///     .connect()
    ///     .await?;
    /// ```
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    fn start(config: BridgeConfig, codecs: Arc<CodecRegistry>, transport: Box<dyn Transport>) -> Self {
        let queue = Arc::new(OutboundQueue::new(config.queue_capacity));
        let publisher = Publisher::new(
            Arc::clone(&queue),
            Arc::clone(&codecs),
            config.device.clone(),
            config.publish_timeout(),
        );
        let subscriber = Subscriber::new(codecs, config.handler_timeout());

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let cancel = CancellationToken::new();

        let backoff = Backoff::new(
            config.initial_reconnect_delay(),
            config.max_reconnect_delay(),
        )
        .with_max_attempts(config.max_reconnect_attempts);

        let supervisor = ConnectionSupervisor {
            transport,
            connect_timeout: config.connect_timeout(),
            queue,
            subscriber: subscriber.clone(),
            inbound_tx,
            state_tx,
            backoff,
            cancel: cancel.clone(),
            active_filters: Vec::new(),
        };

        let dispatcher = tokio::spawn(run_dispatcher(subscriber.clone(), inbound_rx));
        let supervisor = tokio::spawn(supervisor.run());

        Self {
            publisher,
            subscriber,
            state_rx,
            cancel,
            tasks: Mutex::new(Some(Tasks {
                supervisor,
                dispatcher,
            })),
        }
    }

    /// Waits until the bridge is connected.
    ///
    /// Returns immediately when it already is. If the supervisor gives up
    /// in the meantime, the final connection error is returned instead.
    pub async fn wait_connected(&self) -> Result<(), ConnError> {
        let mut state_rx = self.state_rx.clone();
        loop {
            if state_rx.borrow_and_update().is_connected() {
                return Ok(());
            }
            if state_rx.changed().await.is_err() {
                return Err(self.take_fault().await);
            }
        }
    }

    /// Collects the supervisor's exit error after it stopped on its own.
    async fn take_fault(&self) -> ConnError {
        let mut tasks = self.tasks.lock().await;
        let Some(tasks) = tasks.take() else {
            return ConnError::Closed;
        };
        let fault = match tasks.supervisor.await {
            Ok(Ok(())) => ConnError::Closed,
            Ok(Err(reason)) => reason,
            Err(_) => ConnError::Closed,
        };
        let _ = tasks.dispatcher.await;
        fault
    }

    /// Handle for sending events. Clonable and shareable across tasks.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Handle for registering event handlers. Clonable and shareable
    /// across tasks.
    pub fn subscriber(&self) -> Subscriber {
        self.subscriber.clone()
    }

    /// Watch channel carrying connection state transitions.
    ///
    /// Useful for gating work on connectivity or surfacing status in a
    /// UI. The receiver outlives the bridge's tasks; after shutdown it
    /// reports [`ConnectionState::Disconnected`] forever.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Snapshot of the current connection state.
    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Stops the bridge and waits for its tasks to finish.
    ///
    /// Queued events that have not reached the broker are discarded;
    /// waiting senders resolve with a closed error. Calling this more
    /// than once is fine, later calls return immediately.
    ///
    /// # Examples
    /// ```ignore
    /// bridge.shutdown().await;
    /// assert_eq!(bridge.current_state(), ConnectionState::Disconnected);
    /// ```
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            let _ = tasks.supervisor.await;
            let _ = tasks.dispatcher.await;
        }
    }

    /// Waits until the bridge has stopped, reporting how it ended.
    ///
    /// Resolves with `Ok(())` after a requested shutdown and with the
    /// final connection error when the supervisor gave up on its own.
    /// Long-running services select on this to notice a dead bridge.
    pub async fn closed(&self) -> Result<(), ConnError> {
        let mut state_rx = self.state_rx.clone();
        while state_rx.changed().await.is_ok() {}

        let mut tasks = self.tasks.lock().await;
        let Some(tasks) = tasks.take() else {
            return Ok(());
        };
        let result = match tasks.supervisor.await {
            Ok(result) => result,
            Err(_) => Err(ConnError::Closed),
        };
        let _ = tasks.dispatcher.await;
        result
    }
}

/// Configures the non-default parts of a [`Bridge`] before connecting.
///
/// Obtained from [`Bridge::builder`]. Without any customization this is
/// equivalent to [`Bridge::connect`]: the MQTT transport from the config
/// and the four built-in codecs.
pub struct BridgeBuilder {
    config: BridgeConfig,
    codecs: CodecRegistry,
    transport: Option<Box<dyn Transport>>,
}

impl BridgeBuilder {
    fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            codecs: CodecRegistry::with_defaults(),
            transport: None,
        }
    }

    /// Replaces the codec registry.
    ///
    /// Start from [`CodecRegistry::with_defaults`] and add to it unless
    /// the built-in formats really have to go.
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Replaces the transport. Used by tests and examples to run against
    /// an in-process hub instead of a real broker.
    ///
    /// # Examples
    /// ```ignore
    /// let hub = MemoryHub::new();
    /// let bridge = Bridge::builder(config)
    ///     .transport(hub.transport())
    ///     .connect()
    ///     .await?;
    /// ```
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Connects with the assembled parts. See [`Bridge::connect`].
    pub async fn connect(self) -> Result<Bridge, ConnError> {
        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(MqttTransport::new(self.config.clone())),
        };

        let bridge = Bridge::start(self.config, Arc::new(self.codecs), transport);
        bridge.wait_connected().await?;
        Ok(bridge)
    }
}
