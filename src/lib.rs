//! hivelink — telemetry agent over the device-to-application event bridge
//!
//! This crate provides the agent binary built on top of the
//! `hivelink-bridge` library. In the device role it samples a telemetry
//! source on a fixed cadence and publishes the readings as typed events;
//! in the application role it subscribes to device events and sinks them
//! into the log. It is designed for long-running operation with graceful
//! shutdown support and configurable logging.
//!
//! ## Modules
//!
//! * `config` — Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator` crate.
//!
//! * `core` — Core runtime components:
//!   - Device publish loop
//!   - Application event sink
//!   - Telemetry source registry and traits
//!
//! * `logger` — Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.

pub mod config;
pub mod core;
pub mod logger;
