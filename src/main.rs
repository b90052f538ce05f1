use std::{future::Future, pin::Pin, process, sync::OnceLock};

use hivelink::{
    config::{agent::Role, Config},
    core::{app::AppRunner, device::DeviceRunner, sources::registry::Sources},
    logger::LoggerManager,
    print_error,
};
use hivelink_bridge::Bridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

fn log_sources_table(selected: &str, available: Vec<&'static str>) {
    use std::collections::BTreeSet;

    let available_set: BTreeSet<&str> = available.into_iter().collect();

    // Union with the configured name to show *everything* explicitly
    let all_names: BTreeSet<&str> = available_set
        .iter()
        .copied()
        .chain(std::iter::once(selected))
        .collect();

    let name_width = all_names
        .iter()
        .map(|s| s.len())
        .max()
        .unwrap_or(10)
        .max("Source".len());

    let header = format!("{:<width$} | Status", "Source", width = name_width);
    let sep = format!("{}-+-{}", "-".repeat(name_width), "-".repeat(12));

    info!("{}", header);
    info!("{}", sep);

    for name in all_names {
        let status = match (name == selected, available_set.contains(name)) {
            // Configured and present in registry, the normal case
            (true, true) => "SELECTED",

            // Named in config but missing in registry, a configuration error
            (true, false) => "SELECTED (missing)",

            // Present in registry but not configured
            (false, _) => "AVAILABLE",
        };

        info!("{:<width$} | {}", name, status, width = name_width);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting hivelink version {}...", env!("CARGO_PKG_VERSION"));
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Log level: {}", cfg.logger.level);
    info!("Agent role: {:?}", cfg.agent.role);
    debug!("Broker endpoint: {}:{}", cfg.bridge.host, cfg.bridge.port);

    info!("Connecting to broker...");
    let bridge = Bridge::connect(cfg.bridge.clone()).await.unwrap_or_else(|e| {
        error!("Failed to connect bridge: {}", e);
        process::exit(1);
    });
    info!("Bridge connected");

    let cancel = CancellationToken::new();

    let runner: Pin<Box<dyn Future<Output = ()>>> = match cfg.agent.role {
        Role::Device => {
            let Some(settings) = cfg.agent.device.clone() else {
                error!("Role is 'device' but the [agent.device] section is missing");
                process::exit(1);
            };

            log_sources_table(&settings.source, Sources::list());

            let runner = DeviceRunner::new(bridge.publisher(), settings, cancel.clone())
                .unwrap_or_else(|e| {
                    error!("{}", e);
                    process::exit(1);
                });
            Box::pin(runner.run())
        }
        Role::Application => {
            let Some(settings) = cfg.agent.application.clone() else {
                error!("Role is 'application' but the [agent.application] section is missing");
                process::exit(1);
            };

            let runner = AppRunner::new(bridge.subscriber(), settings, cancel.clone());
            Box::pin(runner.run())
        }
    };

    info!("Starting agent loop...");

    tokio::select! {
        _ = runner => {
            error!("Agent loop unexpectedly finished");
        }
        result = bridge.closed() => {
            if let Err(e) = result {
                error!("Bridge stopped: {}", e);
                bridge.shutdown().await;
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
            cancel.cancel();
            tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
        }
    }

    bridge.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
