use hivelink_bridge::{Bridge, BridgeConfig, DeliveryQuality, DeviceIdentity};
use rand::Rng;
use serde_json::json;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting random number device");

    // Device identity against a local broker. A real deployment loads
    // this from a file with BridgeConfig::from_file.
    let config = BridgeConfig {
        org_id: "demo".into(),
        auth_token: "demo-token".into(),
        device: Some(DeviceIdentity {
            device_type: "generator".into(),
            device_id: "generator-01".into(),
        }),
        host: "localhost".into(),
        port: 1883,
        ..BridgeConfig::default()
    };

    let bridge = Bridge::connect(config).await?;
    info!("Bridge connected");

    let publisher = bridge.publisher();

    // Publish a fresh random number every 5 seconds
    let publish_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

            let number: u32 = rand::rng().random_range(0..=1_000_000);
            match publisher
                .send_json(
                    "status",
                    &json!({ "number": number }),
                    DeliveryQuality::AtLeastOnce,
                )
                .await
            {
                Ok(()) => info!("Published number {}", number),
                Err(e) => error!("Failed to publish: {}", e),
            }
        }
    });

    // Wait for Ctrl+C signal
    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    publish_task.abort();
    bridge.shutdown().await;

    info!("Device shut down successfully");
    Ok(())
}
