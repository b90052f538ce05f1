use hivelink_bridge::{
    ApplicationIdentity, Bridge, BridgeConfig, EventData, Filter, SubscriptionSpec,
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting event consumer application");

    let config = BridgeConfig {
        org_id: "demo".into(),
        auth_token: "demo-token".into(),
        application: Some(ApplicationIdentity {
            app_id: "event-printer".into(),
            api_key: "demo-key".into(),
        }),
        host: "localhost".into(),
        port: 1883,
        ..BridgeConfig::default()
    };

    let bridge = Bridge::connect(config).await?;
    info!("Bridge connected");

    // Status events from every generator device, any device id
    let spec = SubscriptionSpec {
        device_type: Filter::exact("generator"),
        event_name: Filter::exact("status"),
        ..SubscriptionSpec::any()
    };

    let handler_id = bridge
        .subscriber()
        .register_fn(spec, |envelope, data| async move {
            match data {
                EventData::Json(value) => {
                    info!(
                        "Received '{}' from {}/{}: {}",
                        envelope.event_name, envelope.device_type, envelope.device_id, value
                    );
                }
                EventData::Raw(bytes) => {
                    info!(
                        "Received '{}' from {}/{}: {} raw bytes",
                        envelope.event_name,
                        envelope.device_type,
                        envelope.device_id,
                        bytes.len()
                    );
                }
            }
            Ok(())
        })
        .await;
    info!("Subscribed with handler {:?}", handler_id);

    // Wait for Ctrl+C signal
    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    bridge.shutdown().await;

    info!("Application shut down successfully");
    Ok(())
}
