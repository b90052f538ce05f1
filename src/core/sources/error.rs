use thiserror::Error;

/// Custom error type for the telemetry source system.
/// Uses `thiserror` for clean, automatic derivation of `Debug`, `Display`, and `Error`
/// traits, with context-rich error messages.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Tried to access a source by name, but it was not registered.
    #[error("Source not found for: {0}")]
    SourceNotFound(String),

    /// The source failed to produce a sample.
    /// Includes the source name and a reason for the failure.
    #[error("Sampling '{source_name}' failed: {reason}")]
    SampleFailed { source_name: String, reason: String },
}
