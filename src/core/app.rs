//! Application-role event sink.
//!
//! The `AppRunner` registers a logging handler for the configured
//! subscription and keeps it installed until shutdown. Every matching
//! device event is written to the log, structured payloads with their
//! decoded content and raw payloads with their size.

use hivelink_bridge::{EventData, EventEnvelope, Subscriber};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::agent::ApplicationSettings;

/// Runner that sinks matching device events into the log.
pub struct AppRunner {
    subscriber: Subscriber,
    settings: ApplicationSettings,
    cancel: CancellationToken,
}

impl AppRunner {
    pub fn new(
        subscriber: Subscriber,
        settings: ApplicationSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscriber,
            settings,
            cancel,
        }
    }

    /// Installs the log sink and keeps it registered until the
    /// cancellation token trips.
    pub async fn run(self) {
        let spec = self.settings.subscription_spec();
        info!(
            "Application sink started (filter: '{}')",
            spec.to_topic_filter()
        );

        let id = self
            .subscriber
            .register_fn(spec, |envelope, data| async move {
                log_event(&envelope, &data);
                Ok(())
            })
            .await;

        self.cancel.cancelled().await;

        self.subscriber.unregister(id).await;
        let stats = self.subscriber.stats();
        info!(
            "Application sink stopped ({} dispatched, {} unmatched)",
            stats.dispatched, stats.unmatched
        );
    }
}

/// Writes one received event to the log.
fn log_event(envelope: &EventEnvelope, data: &EventData) {
    info!(
        "Received device event '{}' at {} for {}/{}",
        envelope.event_name, envelope.timestamp, envelope.device_type, envelope.device_id
    );

    match data {
        EventData::Json(value) => {
            // Devices publishing bare readings use a top-level "number"
            // field; anything else is logged whole.
            if let Some(number) = value.get("number").and_then(|n| n.as_u64()) {
                info!("Received number: {}", number);
            } else {
                info!("Received payload: {}", value);
            }
        }
        EventData::Raw(bytes) => {
            info!("Received {} bytes of raw payload", bytes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use hivelink_bridge::{
        ApplicationIdentity, Bridge, BridgeConfig, DeliveryQuality, DeviceIdentity, MemoryHub,
    };
    use serde_json::json;
    use tokio::time::{sleep, timeout, Duration};
    use tracing_test::traced_test;

    use super::*;

    fn app_bridge_config() -> BridgeConfig {
        BridgeConfig {
            org_id: "acme".into(),
            auth_token: "token".into(),
            application: Some(ApplicationIdentity {
                app_id: "sink-test".into(),
                api_key: "key".into(),
            }),
            ..BridgeConfig::default()
        }
    }

    fn device_bridge_config() -> BridgeConfig {
        BridgeConfig {
            org_id: "acme".into(),
            auth_token: "token".into(),
            device: Some(DeviceIdentity {
                device_type: "generator".into(),
                device_id: "g-1".into(),
            }),
            ..BridgeConfig::default()
        }
    }

    async fn connect(hub: &MemoryHub, config: BridgeConfig) -> Bridge {
        Bridge::builder(config)
            .transport(hub.transport())
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_sink_logs_matching_events() {
        let hub = MemoryHub::new();
        let app = connect(&hub, app_bridge_config()).await;
        let device = connect(&hub, device_bridge_config()).await;

        let cancel = CancellationToken::new();
        let runner = AppRunner::new(
            app.subscriber(),
            ApplicationSettings {
                device_type: Some("generator".into()),
                ..ApplicationSettings::default()
            },
            cancel.clone(),
        );
        let handle = tokio::spawn(runner.run());
        sleep(Duration::from_millis(50)).await;

        device
            .publisher()
            .send_json("status", &json!({ "number": 42 }), DeliveryQuality::AtLeastOnce)
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(app.subscriber().stats().dispatched, 1);
        assert!(logs_contain("Received device event 'status'"));
        assert!(logs_contain("generator/g-1"));
        assert!(logs_contain("Received number: 42"));

        cancel.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("sink should stop on cancellation")
            .unwrap();

        device.shutdown().await;
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_sink_ignores_other_device_types() {
        let hub = MemoryHub::new();
        let app = connect(&hub, app_bridge_config()).await;
        let device = connect(&hub, device_bridge_config()).await;

        let cancel = CancellationToken::new();
        let runner = AppRunner::new(
            app.subscriber(),
            ApplicationSettings {
                device_type: Some("thermostat".into()),
                ..ApplicationSettings::default()
            },
            cancel.clone(),
        );
        let handle = tokio::spawn(runner.run());
        sleep(Duration::from_millis(50)).await;

        device
            .publisher()
            .send_json("status", &json!({ "number": 7 }), DeliveryQuality::AtLeastOnce)
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        let stats = app.subscriber().stats();
        assert_eq!(stats.dispatched, 0);
        assert!(!logs_contain("Received device event"));

        cancel.cancel();
        let _ = timeout(Duration::from_secs(1), handle).await;
        device.shutdown().await;
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_cancel_removes_the_sink() {
        let hub = MemoryHub::new();
        let app = connect(&hub, app_bridge_config()).await;
        let device = connect(&hub, device_bridge_config()).await;

        let cancel = CancellationToken::new();
        let runner = AppRunner::new(
            app.subscriber(),
            ApplicationSettings::default(),
            cancel.clone(),
        );
        let handle = tokio::spawn(runner.run());
        sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("sink should stop on cancellation")
            .unwrap();
        assert!(logs_contain("Application sink stopped"));

        device
            .publisher()
            .send_json("status", &json!({ "number": 9 }), DeliveryQuality::AtLeastOnce)
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        // The registration is gone and its filter unsubscribed, so the
        // event is not delivered.
        assert_eq!(app.subscriber().stats().dispatched, 0);
        assert!(!logs_contain("Received number: 9"));

        device.shutdown().await;
        app.shutdown().await;
    }
}
