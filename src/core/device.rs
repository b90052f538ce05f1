//! Device-role publish loop.
//!
//! The `DeviceRunner` periodically samples the configured telemetry
//! source and publishes the result as a typed event through the bridge
//! publisher. Sampling and publish failures are logged and never end
//! the loop; the bridge queues events across broker outages underneath,
//! so the loop keeps its cadence no matter the connection state.

use std::sync::Arc;

use hivelink_bridge::Publisher;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::sources::{
    registry::{DynSource, Sources},
    types::SourceResult,
};
use crate::config::agent::DeviceSettings;

/// Runner that manages periodic sampling and publishing of telemetry.
pub struct DeviceRunner {
    publisher: Publisher,
    source: Arc<dyn DynSource>,
    settings: DeviceSettings,
    cancel: CancellationToken,
}

impl DeviceRunner {
    /// Resolves the configured source and builds the runner.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SourceNotFound` when the settings name a
    /// source that is not registered.
    pub fn new(
        publisher: Publisher,
        settings: DeviceSettings,
        cancel: CancellationToken,
    ) -> SourceResult<Self> {
        let source = Sources::get(&settings.source)?;

        Ok(Self {
            publisher,
            source,
            settings,
            cancel,
        })
    }

    /// Runs the publish loop until the cancellation token trips.
    ///
    /// Publishes one sample immediately, then keeps the configured
    /// cadence, with the cancellation token checked at every loop
    /// boundary.
    pub async fn run(self) {
        let interval = Duration::from_secs(self.settings.interval_secs);
        info!(
            "Device loop started (source: '{}', event: '{}', interval: {}s)",
            self.settings.source, self.settings.event_name, self.settings.interval_secs
        );

        loop {
            let start = Instant::now();

            self.publish_sample().await;

            let wait = interval.saturating_sub(start.elapsed());
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Device loop stopped");
                    return;
                }
                _ = sleep(wait) => {}
            }
        }
    }

    /// One sample-and-publish cycle.
    async fn publish_sample(&self) {
        let data = match self.source.sample_dyn().await {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to sample '{}': {}", self.settings.source, e);
                return;
            }
        };

        debug!("Sampled '{}'", self.settings.source);

        if let Err(e) = self
            .publisher
            .send(
                &self.settings.event_name,
                &data,
                &self.settings.encoding,
                self.settings.quality,
            )
            .await
        {
            error!("Publish failed for '{}': {}", self.settings.event_name, e);
        }
    }
}
