//! # hivelink-bridge: Device-to-application event bridge over MQTT
//!
//! Connects fleets of devices to backend applications through an MQTT
//! broker, with the plumbing a long-running connection actually needs:
//!
//! - **Automatic reconnection** with jittered exponential backoff
//! - **Offline queueing** so events sent during an outage flow out once
//!   the connection is back
//! - **Delivery quality** per event: fire-and-forget or wait for the
//!   broker's acknowledgement
//! - **Subscription replay** on every new session, in registration order
//! - **Pluggable codecs** (JSON, MessagePack, CBOR, raw bytes) behind one
//!   registry
//! - **Handler registry** dispatching each inbound event to the first
//!   matching handler, with per-handler timeouts
//! - **TLS** with optional client certificate authentication
//! - **State watch** for UIs and readiness probes
//!
//! # Quick Start
//!
//! A device publishing its own readings:
//!
//! ```ignore
//! use hivelink_bridge::{Bridge, BridgeConfig, DeliveryQuality};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::from_file("/etc/hivelink/config.toml")?;
//!     let bridge = Bridge::connect(config).await?;
//!
//!     let publisher = bridge.publisher();
//!     publisher
//!         .send_json(
//!             "temperature",
//!             &serde_json::json!({ "celsius": 21.4 }),
//!             DeliveryQuality::AtLeastOnce,
//!         )
//!         .await?;
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! An application consuming events from many devices:
//!
//! ```ignore
//! use hivelink_bridge::{Bridge, BridgeConfig, Filter, SubscriptionSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::from_file("/etc/hivelink/config.toml")?;
//!     let bridge = Bridge::connect(config).await?;
//!
//!     let spec = SubscriptionSpec {
//!         device_type: Filter::exact("thermostat"),
//!         event_name: Filter::exact("temperature"),
//!         ..SubscriptionSpec::any()
//!     };
//!     bridge
//!         .subscriber()
//!         .register_fn(spec, |envelope, data| async move {
//!             println!("{}: {:?}", envelope.device_id, data);
//!             Ok(())
//!         })
//!         .await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Topics
//!
//! Every event travels on a topic that spells out its full address:
//!
//! ```text
//! iot/type/{device_type}/id/{device_id}/evt/{event_name}/fmt/{encoding}
//! ```
//!
//! Subscriptions are expressed as a [`SubscriptionSpec`], where each of
//! the three address fields is either a literal or "match anything". The
//! encoding segment is always a wildcard on the subscribe side; the codec
//! named in the received topic decides how the payload is decoded.
//!
//! # Delivery quality
//!
//! [`DeliveryQuality::AtMostOnce`] events are enqueued and forgotten.
//! When the queue is full the oldest best-effort event is evicted to make
//! room, so a long outage keeps the freshest data.
//!
//! [`DeliveryQuality::AtLeastOnce`] events are kept until the broker
//! acknowledges them. The sender waits for that acknowledgement (bounded
//! by the publish timeout), unacknowledged events are redelivered after a
//! reconnect, and a full queue makes the sender wait for space rather
//! than drop anything.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                Application                    │
//! │  Publisher handle          Subscriber handle  │
//! └───────┬───────────────────────────▲───────────┘
//!         │ outbound queue            │ dispatcher
//! ┌───────▼───────────────────────────┴───────────┐
//! │            ConnectionSupervisor               │
//! │  dial / backoff / subscription replay / flush │
//! └───────────────────────┬───────────────────────┘
//!                         │ Transport trait
//! ┌───────────────────────▼───────────────────────┐
//! │        MqttTransport (rumqttc) or             │
//! │        MemoryTransport (tests, demos)         │
//! └───────────────────────┬───────────────────────┘
//!                         │
//!                    MQTT broker
//! ```
//!
//! The supervisor is the only task that touches the transport. Publisher
//! handles feed it through a bounded queue; it feeds subscriber handlers
//! through the dispatcher. Both handles are cheap clones and safe to
//! share across tasks.
//!
//! # Configuration
//!
//! Load a validated config from TOML or construct one in code:
//!
//! ```toml
//! org_id = "acme"
//! auth_token = "s3cret"
//! host = "broker.example.com"
//! port = 8883
//!
//! [device]
//! device_type = "thermostat"
//! device_id = "t-042"
//!
//! [tls]
//! ca_cert_path = "/etc/hivelink/ca.pem"
//! ```
//!
//! ```ignore
//! let config = BridgeConfig {
//!     org_id: "acme".into(),
//!     auth_token: "s3cret".into(),
//!     device: Some(DeviceIdentity {
//!         device_type: "thermostat".into(),
//!         device_id: "t-042".into(),
//!     }),
//!     ..Default::default()
//! };
//! ```
//!
//! The identity decides which side of the bridge this process is: a
//! `[device]` section publishes under its own address, an
//! `[application]` section consumes events across the organization.
//! Exactly one of the two must be present.
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──(session up)──> Connected
//!                                  │
//!                           (network error)
//!                                  │
//!                                  ▼
//!                        Backoff { retry_in }
//!                                  │
//!                            (delay elapsed)
//!                                  │
//!                                  ▼
//!                              Connecting
//! ```
//!
//! Delays double from the configured initial value up to the cap, with
//! ten percent of jitter, and reset after every successful connect. Watch
//! the state to surface this to users:
//!
//! ```ignore
//! let mut state_rx = bridge.state();
//! while state_rx.changed().await.is_ok() {
//!     match *state_rx.borrow() {
//!         ConnectionState::Connected => println!("online"),
//!         ConnectionState::Backoff { retry_in } => {
//!             println!("retrying in {:.1}s", retry_in.as_secs_f64())
//!         }
//!         other => println!("{}", other),
//!     }
//! }
//! ```
//!
//! # Error handling
//!
//! Failures are split by origin so callers can react properly:
//!
//! - [`ConnError`]: the connection itself. Returned by
//!   [`Bridge::connect`] only once it is final, for example rejected
//!   credentials or an exhausted retry bound.
//! - [`PublishError`]: one outbound event. Encoding failures, a full
//!   queue, or a missed acknowledgement; the connection is unaffected.
//! - [`CodecError`]: encoding or decoding a payload.
//! - [`ConfigError`]: reading, parsing, or validating configuration.
//!
//! Transient network drops never surface as errors; the supervisor
//! handles them internally and the state watch tells the story.
//!
//! # Thread safety
//!
//! [`Publisher`] and [`Subscriber`] are clonable handles; all clones
//! share one queue and one registration set. [`Bridge`] itself is
//! shareable behind an `Arc` when several tasks need shutdown access.
//!
//! # Examples
//!
//! See the `examples/` directory:
//!
//! - `01_publish_random_numbers.rs` - a device publishing readings
//! - `02_subscribe_print_events.rs` - an application printing events
//! - `03_offline_queueing.rs` - queueing across a simulated outage

// Module declarations
pub mod backoff;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod state;
pub mod subscriber;
pub mod supervisor;
pub mod topic;
pub mod transport;

// Re-exports: Bridge entry points
//
// These are how applications start and stop the whole thing
pub use supervisor::{Bridge, BridgeBuilder};
// Re-exports: Configuration
pub use config::{ApplicationIdentity, BridgeConfig, DeviceIdentity, TlsConfig};
// Re-exports: Events and addressing
pub use envelope::{DeliveryQuality, EventData, EventEnvelope};
pub use topic::{EventAddress, Filter, SubscriptionSpec};
// Re-exports: Codecs
pub use codec::{Codec, CodecRegistry};
// Re-exports: Publishing
pub use publisher::{Publisher, QueueStats};
// Re-exports: Subscribing
pub use subscriber::{DispatchStats, EventHandler, HandlerId, HandlerResult, Subscriber};
// Re-exports: State monitoring
pub use state::ConnectionState;
// Re-exports: Errors
pub use error::{CodecError, ConfigError, ConnError, HandlerError, PublishError};
// Re-exports: Transport abstraction
//
// Needed when plugging a custom transport into the builder; the memory
// hub doubles as a test broker
pub use transport::memory::MemoryHub;
pub use transport::{DeliveryTag, Disposition, Transport, TransportEvent};

/// Result type for bridge operations.
///
/// Defaults to [`ConnError`], the error of the connection-level calls;
/// operations with their own failure modes plug in their error type.
///
/// # Examples
/// ```ignore
/// async fn run() -> hivelink_bridge::Result<()> {
///     let bridge = Bridge::connect(config).await?;
///     bridge.shutdown().await;
///     Ok(())
/// }
/// ```
pub type Result<T, E = ConnError> = std::result::Result<T, E>;
