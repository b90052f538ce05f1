use rand::Rng;
use serde_json::json;

use super::{traits::DataSource, types::SourceResult};
use crate::register_source;

/// Telemetry source producing one uniformly random number per cycle.
///
/// Emits payloads of the shape `{"number": n}` with `n` drawn from
/// `0..=1_000_000`. Useful for demos and for exercising the publish
/// pipeline without any hardware attached.
#[derive(Debug, Clone, Default)]
pub struct RandomSource;

impl RandomSource {
    /// Creates a new RandomSource instance
    pub fn new() -> Self {
        RandomSource
    }
}

#[async_trait::async_trait]
impl DataSource for RandomSource {
    type Output = serde_json::Value;

    async fn sample(&self) -> SourceResult<Self::Output> {
        let number: u32 = rand::rng().random_range(0..=1_000_000);

        Ok(json!({ "number": number }))
    }
}

register_source!(RandomSource, "random");
