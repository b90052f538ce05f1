/// Synthetic camera source module.
/// Produces opaque frame buffers standing in for a real capture device.
pub mod camera;

/// Error types and handling utilities.
/// Common error types used across all telemetry sources.
pub mod error;

/// Uniform random number source module.
/// Produces one random reading per publish cycle.
pub mod random;

/// Source registry and management module.
/// Central registry for managing all available telemetry sources.
pub mod registry;

/// Core traits and interfaces.
/// Defines the common interface for all telemetry sources.
pub mod traits;

/// Common types and result definitions.
/// Shared result type used throughout the source system.
pub mod types;

// ----------------------------------------------------------------------------
// Re-exports for public API
// ----------------------------------------------------------------------------

/// Synthetic camera source implementation.
pub use camera::CameraSource;
/// Source error type.
pub use error::SourceError;
/// Random number source implementation.
pub use random::RandomSource;
/// Source registry and facade for looking up registered sources.
pub use registry::{SourceRegistry, Sources};
/// Core trait for telemetry sources.
pub use traits::DataSource;
/// Common result type for source operations.
pub use types::SourceResult;
