/// Application-role runtime.
/// Sinks matching device events into the log.
pub mod app;

/// Device-role runtime.
/// Samples the configured telemetry source and publishes events.
pub mod device;

/// Telemetry sources.
/// Source traits, the registry, and the built-in implementations.
pub mod sources;

// ----------------------------------------------------------------------------
// Re-exports for public API
// ----------------------------------------------------------------------------

/// Application event sink runner.
pub use app::AppRunner;
/// Device publish loop runner.
pub use device::DeviceRunner;
