//! Runs entirely in-process: a [`MemoryHub`] plays the broker, so this
//! example needs no MQTT server. It severs the link mid-run to show
//! events queueing while offline and flushing after the reconnect.

use hivelink_bridge::{
    ApplicationIdentity, Bridge, BridgeConfig, DeliveryQuality, DeviceIdentity, MemoryHub,
    SubscriptionSpec,
};
use serde_json::json;
use tracing::info;

fn device_config() -> BridgeConfig {
    BridgeConfig {
        org_id: "demo".into(),
        auth_token: "demo-token".into(),
        device: Some(DeviceIdentity {
            device_type: "generator".into(),
            device_id: "generator-01".into(),
        }),
        initial_reconnect_delay_secs: 0.5,
        ..BridgeConfig::default()
    }
}

fn app_config() -> BridgeConfig {
    BridgeConfig {
        org_id: "demo".into(),
        auth_token: "demo-token".into(),
        application: Some(ApplicationIdentity {
            app_id: "event-printer".into(),
            api_key: "demo-key".into(),
        }),
        initial_reconnect_delay_secs: 0.5,
        ..BridgeConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let hub = MemoryHub::new();

    // Consumer side: print every event that arrives
    let app = Bridge::builder(app_config())
        .transport(hub.transport())
        .connect()
        .await?;
    app.subscriber()
        .register_fn(SubscriptionSpec::any(), |envelope, data| async move {
            info!(
                "Delivered '{}' from {}/{}: {:?}",
                envelope.event_name, envelope.device_type, envelope.device_id, data
            );
            Ok(())
        })
        .await;

    // Producer side
    let device = Bridge::builder(device_config())
        .transport(hub.transport())
        .connect()
        .await?;
    let publisher = device.publisher();
    info!("Both bridges connected");

    // Sever the link. The supervisors fall back to reconnect attempts.
    hub.set_online(false).await;
    info!("Link severed");

    for sequence in 1..=3u32 {
        publisher
            .send_json(
                "status",
                &json!({ "number": sequence }),
                DeliveryQuality::AtMostOnce,
            )
            .await?;
    }

    let stats = publisher.stats().await;
    info!("Queued while offline: {} events", stats.queued);

    // Restore the link and wait for the device bridge to reconnect
    hub.set_online(true).await;
    info!("Link restored");

    let mut state = device.state();
    while !state.borrow_and_update().is_connected() {
        state.changed().await?;
    }
    info!("Device reconnected");

    // Give the flushed events a moment to cross the hub
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    let stats = publisher.stats().await;
    info!("Queued after reconnect: {} events", stats.queued);

    device.shutdown().await;
    app.shutdown().await;

    info!("Done");
    Ok(())
}
