use super::error::SourceError;

/// A convenient type alias for results returned by telemetry sources.
///
/// Operations that can fail while sampling (reading hardware, synthesizing
/// frames, looking up registered sources) return a `Result` where the error
/// type is always our domain-specific `SourceError`.
///
/// Using this alias keeps the code consistent, making it immediately clear
/// that any function returning `SourceResult<T>` may encounter one of the
/// well-defined source-related errors.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
