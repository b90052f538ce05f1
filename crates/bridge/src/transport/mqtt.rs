//! MQTT transport backed by rumqttc.
//!
//! [`MqttTransport`] turns the generic transport contract into rumqttc
//! calls. Each `open` builds a fresh client and event loop from the
//! bridge config, so every session attempt starts from clean protocol
//! state; [`Transport::next_event`] drives the event loop and translates
//! packets into transport events.
//!
//! # Acknowledgement correlation
//!
//! rumqttc does not return the packet id when a publish is queued, it
//! announces it later as an outgoing event. Delivery tags are therefore
//! matched up in two steps: `publish` queues the new tag, and the
//! `Outgoing::Publish` notification for the same request, which arrives
//! in queueing order, ties the tag to its packet id. The `PubAck` for
//! that packet id then surfaces as [`TransportEvent::Acked`].

use std::{
    collections::{HashMap, VecDeque},
    fs,
};

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS, SubscribeFilter, TlsConfiguration,
};
use tracing::{debug, trace};

use crate::{
    config::{BridgeConfig, TlsConfig},
    envelope::DeliveryQuality,
    error::ConnError,
    transport::{DeliveryTag, Disposition, Transport, TransportEvent},
};

/// Capacity of rumqttc's internal request channel. The supervisor
/// forwards one publish at a time, so this never needs to be large.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// [`Transport`] implementation for MQTT brokers.
pub struct MqttTransport {
    config: BridgeConfig,
    session: Option<Session>,
    next_tag: u64,
}

/// One broker session: the client half, the event loop half, and the
/// tag bookkeeping that only lives as long as the session does.
struct Session {
    client: AsyncClient,
    event_loop: EventLoop,
    /// Tags issued by `publish` whose packet id is not yet known,
    /// in queueing order.
    unmapped: VecDeque<DeliveryTag>,
    /// Packet id to tag, for publishes already on the wire.
    inflight: HashMap<u16, DeliveryTag>,
}

impl MqttTransport {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            session: None,
            next_tag: 0,
        }
    }

    fn build_session(&self) -> Result<Session, ConnError> {
        let mut opts = MqttOptions::new(
            self.config.client_id(),
            self.config.host.clone(),
            self.config.port,
        );
        opts.set_keep_alive(self.config.keep_alive());
        opts.set_clean_session(self.config.clean_session);
        opts.set_inflight(self.config.max_inflight);

        let (username, password) = self.config.broker_credentials();
        opts.set_credentials(username, password);

        // Devices announce an ungraceful drop through a retained status
        // message the broker publishes on their behalf.
        if let Some(device) = &self.config.device {
            let status_topic = format!(
                "iot/type/{}/id/{}/status",
                device.device_type, device.device_id
            );
            opts.set_last_will(LastWill::new(
                status_topic,
                "offline".as_bytes().to_vec(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        if let Some(tls) = &self.config.tls {
            opts.set_transport(build_tls_transport(tls)?);
        }

        let (client, event_loop) = AsyncClient::new(opts, REQUEST_CHANNEL_CAPACITY);
        Ok(Session {
            client,
            event_loop,
            unmapped: VecDeque::new(),
            inflight: HashMap::new(),
        })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&mut self) -> Result<(), ConnError> {
        // A fresh client per attempt: protocol state, packet ids and
        // pending requests never leak across sessions.
        self.session = Some(self.build_session()?);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        quality: DeliveryQuality,
    ) -> Result<Option<DeliveryTag>, ConnError> {
        let session = self.session.as_mut().ok_or(ConnError::Closed)?;
        session
            .client
            .publish(topic, qos_for(quality), false, payload)
            .await?;

        match quality {
            DeliveryQuality::AtMostOnce => Ok(None),
            DeliveryQuality::AtLeastOnce => {
                self.next_tag += 1;
                let tag = DeliveryTag(self.next_tag);
                session.unmapped.push_back(tag);
                Ok(Some(tag))
            }
        }
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnError> {
        let session = self.session.as_mut().ok_or(ConnError::Closed)?;
        session.client.subscribe(filter, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn subscribe_all(&mut self, filters: &[String]) -> Result<(), ConnError> {
        if filters.is_empty() {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(ConnError::Closed)?;
        let subscriptions: Vec<SubscribeFilter> = filters
            .iter()
            .map(|filter| SubscribeFilter::new(filter.clone(), QoS::AtLeastOnce))
            .collect();
        session.client.subscribe_many(subscriptions).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), ConnError> {
        let session = self.session.as_mut().ok_or(ConnError::Closed)?;
        session.client.unsubscribe(filter).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(session) = self.session.as_mut() else {
            // Nothing can happen while no session exists. Park until the
            // caller opens one; the supervisor selects over this future.
            return std::future::pending().await;
        };

        loop {
            match session.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        debug!("Broker accepted the session");
                        return TransportEvent::Online;
                    }
                    return TransportEvent::Offline {
                        reason: ConnError::Refused(format!("{:?}", ack.code)),
                        disposition: refusal_disposition(ack.code),
                    };
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "Inbound publish");
                    return TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    if let Some(tag) = session.inflight.remove(&ack.pkid) {
                        return TransportEvent::Acked(tag);
                    }
                    debug!(pkid = ack.pkid, "PubAck for a packet id this session never issued");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return TransportEvent::Offline {
                        reason: ConnError::Dropped("server sent DISCONNECT".into()),
                        disposition: Disposition::Reconnect,
                    };
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    // Packet id 0 marks an at-most-once publish, which
                    // never produces an acknowledgement.
                    if pkid != 0 {
                        if let Some(tag) = session.unmapped.pop_front() {
                            session.inflight.insert(pkid, tag);
                        }
                    }
                }
                Ok(_) => {
                    // Pings, SubAcks and other protocol chatter rumqttc
                    // already handles.
                }
                Err(err) => {
                    let disposition = classify_connection_error(&err);
                    let reason = match err {
                        ConnectionError::ConnectionRefused(code) => {
                            ConnError::Refused(format!("{code:?}"))
                        }
                        other => ConnError::from(other),
                    };
                    return TransportEvent::Offline {
                        reason,
                        disposition,
                    };
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnError> {
        if let Some(session) = self.session.take() {
            // Best effort. The session is gone either way.
            if let Err(e) = session.client.disconnect().await {
                debug!("Error sending disconnect packet: {e:?}");
            }
        }
        Ok(())
    }
}

fn qos_for(quality: DeliveryQuality) -> QoS {
    match quality {
        DeliveryQuality::AtMostOnce => QoS::AtMostOnce,
        DeliveryQuality::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Loads certificate material from disk and assembles the rumqttc TLS
/// transport. Runs once per session attempt, before any socket work.
fn build_tls_transport(tls: &TlsConfig) -> Result<rumqttc::Transport, ConnError> {
    tls.validate_config()
        .map_err(|e| ConnError::Tls(format!("Invalid TLS configuration: {e}")))?;

    let ca_path = tls
        .ca_cert_path
        .as_deref()
        .ok_or_else(|| ConnError::Tls("CA certificate path is required".into()))?;
    let ca = fs::read(ca_path)?;

    let client_auth = match (&tls.client_cert_path, &tls.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some((fs::read(cert_path)?, fs::read(key_path)?)),
        _ => None,
    };

    Ok(rumqttc::Transport::Tls(TlsConfiguration::Simple {
        ca,
        client_auth,
        alpn: None,
    }))
}

/// Splits connection errors into those worth retrying and those that
/// will fail identically forever.
fn classify_connection_error(err: &ConnectionError) -> Disposition {
    match err {
        // Certificate or crypto setup problems do not fix themselves.
        ConnectionError::Tls(_) => Disposition::Fatal,

        // Protocol state corruption, or the broker answered the
        // handshake with something that is not a CONNACK at all.
        ConnectionError::MqttState(_) => Disposition::Fatal,
        ConnectionError::NotConnAck(_) => Disposition::Fatal,

        // The request channel is drained and closed; the client half is
        // gone and reopening is the only way forward.
        ConnectionError::RequestsDone => Disposition::Fatal,

        ConnectionError::Io(e) => match e.kind() {
            // Local misconfiguration rather than a network condition.
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Disposition::Fatal,
            _ => Disposition::Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Disposition::Reconnect,

        ConnectionError::ConnectionRefused(code) => refusal_disposition(*code),

        // New error variants in future rumqttc releases default to
        // retrying rather than taking the bridge down.
        #[allow(unreachable_patterns)]
        _ => Disposition::Reconnect,
    }
}

fn refusal_disposition(code: ConnectReturnCode) -> Disposition {
    match code {
        // Wrong credentials or an identity the broker will never
        // accept. Retrying would loop on the same refusal.
        ConnectReturnCode::RefusedProtocolVersion
        | ConnectReturnCode::BadClientId
        | ConnectReturnCode::BadUserNamePassword
        | ConnectReturnCode::NotAuthorized => Disposition::Fatal,

        // The broker is up but momentarily unable to take sessions.
        ConnectReturnCode::ServiceUnavailable => Disposition::Reconnect,

        #[allow(unreachable_patterns)]
        _ => Disposition::Reconnect,
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;
    use crate::config::{DeviceIdentity, TlsConfig};

    struct TestFiles {
        _temp_dir: TempDir,
        ca_cert: String,
        client_cert: String,
        client_key: String,
    }

    impl TestFiles {
        fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;

            let ca_cert = temp_dir.path().join("ca.pem");
            let client_cert = temp_dir.path().join("client.crt");
            let client_key = temp_dir.path().join("client.key");

            File::create(&ca_cert)?.write_all(b"ca certificate content")?;
            File::create(&client_cert)?.write_all(b"client certificate content")?;
            File::create(&client_key)?.write_all(b"client key content")?;

            Ok(TestFiles {
                _temp_dir: temp_dir,
                ca_cert: ca_cert.to_string_lossy().into_owned(),
                client_cert: client_cert.to_string_lossy().into_owned(),
                client_key: client_key.to_string_lossy().into_owned(),
            })
        }
    }

    fn device_config() -> BridgeConfig {
        BridgeConfig {
            org_id: "acme".to_string(),
            auth_token: "s3cret".to_string(),
            device: Some(DeviceIdentity {
                device_type: "thermostat".to_string(),
                device_id: "t-01".to_string(),
            }),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_builds_tcp_session() {
        let mut transport = MqttTransport::new(device_config());
        assert!(transport.open().await.is_ok());
        assert!(transport.session.is_some());
    }

    #[tokio::test]
    async fn test_open_builds_tls_session_with_client_auth() {
        let test_files = TestFiles::new().expect("Failed to create test files");

        let mut config = device_config();
        config.port = 8883;
        config.tls = Some(TlsConfig::with_client_auth(
            &test_files.ca_cert,
            &test_files.client_cert,
            &test_files.client_key,
        ));

        let mut transport = MqttTransport::new(config);
        assert!(transport.open().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_fails_on_missing_ca_file() {
        let mut config = device_config();
        config.tls = Some(TlsConfig::with_ca_only("/nonexistent/ca.pem"));

        let mut transport = MqttTransport::new(config);
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, ConnError::Io(_)));
    }

    #[tokio::test]
    async fn test_publish_without_session_is_closed() {
        let mut transport = MqttTransport::new(device_config());
        let err = transport
            .publish("iot/type/t/id/i/evt/e/fmt/json", Bytes::from_static(b"{}"), DeliveryQuality::AtMostOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnError::Closed));
    }

    #[tokio::test]
    async fn test_at_least_once_publish_allocates_tags() {
        let mut transport = MqttTransport::new(device_config());
        transport.open().await.unwrap();

        let first = transport
            .publish("iot/type/t/id/i/evt/e/fmt/json", Bytes::from_static(b"{}"), DeliveryQuality::AtLeastOnce)
            .await
            .unwrap();
        let second = transport
            .publish("iot/type/t/id/i/evt/e/fmt/json", Bytes::from_static(b"{}"), DeliveryQuality::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(first, Some(DeliveryTag(1)));
        assert_eq!(second, Some(DeliveryTag(2)));
    }

    #[tokio::test]
    async fn test_at_most_once_publish_has_no_tag() {
        let mut transport = MqttTransport::new(device_config());
        transport.open().await.unwrap();

        let tag = transport
            .publish("iot/type/t/id/i/evt/e/fmt/json", Bytes::from_static(b"{}"), DeliveryQuality::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(tag, None);
    }

    #[test]
    fn test_io_error_classification() {
        use std::io;

        let transient = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(classify_connection_error(&transient), Disposition::Reconnect);

        let fatal = ConnectionError::Io(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        assert_eq!(classify_connection_error(&fatal), Disposition::Fatal);

        let fatal = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert_eq!(classify_connection_error(&fatal), Disposition::Fatal);
    }

    #[test]
    fn test_refusal_classification() {
        assert_eq!(
            refusal_disposition(ConnectReturnCode::BadUserNamePassword),
            Disposition::Fatal
        );
        assert_eq!(
            refusal_disposition(ConnectReturnCode::NotAuthorized),
            Disposition::Fatal
        );
        assert_eq!(
            refusal_disposition(ConnectReturnCode::ServiceUnavailable),
            Disposition::Reconnect
        );
    }

    #[test]
    fn test_timeouts_are_transient() {
        assert_eq!(
            classify_connection_error(&ConnectionError::NetworkTimeout),
            Disposition::Reconnect
        );
        assert_eq!(
            classify_connection_error(&ConnectionError::FlushTimeout),
            Disposition::Reconnect
        );
    }
}
