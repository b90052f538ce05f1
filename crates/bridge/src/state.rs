//! Connection lifecycle states published by the supervisor.
//!
//! The supervisor is the only writer; everyone else observes the state
//! through a `tokio::sync::watch` channel obtained from the bridge
//! handle. States change only when something actually happened, so
//! watchers can treat every change notification as meaningful.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport session and no attempt in progress. The initial
    /// state, and the final state after shutdown.
    Disconnected,

    /// A connection attempt is in flight.
    Connecting,

    /// The transport session is up; queued events are being drained and
    /// subscriptions are active.
    Connected,

    /// The last attempt failed and the supervisor is waiting out the
    /// backoff delay before trying again.
    Backoff {
        /// How long the supervisor decided to wait.
        retry_in: Duration,
    },
}

impl ConnectionState {
    /// Short machine-friendly name, stable across releases.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff { .. } => "backoff",
        }
    }

    /// One-line description for operator-facing output.
    pub fn details(&self) -> String {
        match self {
            Self::Disconnected => "no transport session".to_string(),
            Self::Connecting => "connection attempt in progress".to_string(),
            Self::Connected => "transport session established".to_string(),
            Self::Backoff { retry_in } => {
                format!("waiting {:.1}s before reconnecting", retry_in.as_secs_f64())
            }
        }
    }

    /// Whether events can be delivered right now.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the supervisor is still working towards a session, either
    /// actively dialing or waiting out a backoff delay.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Backoff { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
