//! Agent role configuration.
//!
//! The agent runs exactly one side of the bridge per process: a device
//! that samples a telemetry source and publishes events, or an
//! application that subscribes to device events and hands them to the
//! log sink. This module defines the structures that select the role
//! and tune each loop.

use hivelink_bridge::{DeliveryQuality, Filter, SubscriptionSpec};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Which side of the bridge this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "device")]
    Device,
    #[serde(rename = "application")]
    Application,
}

impl Default for Role {
    fn default() -> Self {
        Role::Device
    }
}

/// Role selection plus the settings for whichever role is active.
///
/// The section matching `role` must be present; the other one is
/// ignored. Schema validation enforces the pairing so a misconfigured
/// agent fails at startup with a field-level message instead of
/// panicking mid-run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_role_settings"))]
pub struct AgentConfig {
    /// Selected role.
    pub role: Role,

    /// Device loop settings. Required when `role = "device"`.
    #[validate(nested)]
    pub device: Option<DeviceSettings>,

    /// Application sink settings. Required when `role = "application"`.
    #[validate(nested)]
    pub application: Option<ApplicationSettings>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            role: Role::default(),
            device: Some(DeviceSettings::default()),
            application: None,
        }
    }
}

/// Checks that the section matching the selected role is present.
fn validate_role_settings(config: &AgentConfig) -> Result<(), ValidationError> {
    match config.role {
        Role::Device if config.device.is_none() => {
            let mut err = ValidationError::new("missing_device_settings");
            err.message = Some("role = \"device\" requires an [agent.device] section".into());
            Err(err)
        }
        Role::Application if config.application.is_none() => {
            let mut err = ValidationError::new("missing_application_settings");
            err.message =
                Some("role = \"application\" requires an [agent.application] section".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

/// Settings for the device publish loop.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceSettings {
    /// Event name published on every cycle.
    #[validate(length(min = 1, message = "Event name must not be empty"))]
    pub event_name: String,

    /// Encoding tag the payload is published under. Must match a codec
    /// registered with the bridge.
    #[validate(length(min = 1, message = "Encoding must not be empty"))]
    pub encoding: String,

    /// Name of the registered telemetry source to sample.
    #[validate(length(min = 1, message = "Source name must not be empty"))]
    pub source: String,

    /// Seconds between samples.
    #[validate(range(min = 1, message = "Interval must be at least 1 second"))]
    pub interval_secs: u64,

    /// Delivery guarantee requested for each publish.
    pub quality: DeliveryQuality,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            event_name: "status".into(),
            encoding: "json".into(),
            source: "random".into(),
            interval_secs: 5,
            quality: DeliveryQuality::AtLeastOnce,
        }
    }
}

/// Settings for the application event sink.
///
/// Each field narrows the subscription; a missing field matches any
/// value, so an empty section consumes every event in the organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Only events from this device type.
    pub device_type: Option<String>,

    /// Only events from this device id.
    pub device_id: Option<String>,

    /// Only events with this name.
    pub event_name: Option<String>,
}

impl ApplicationSettings {
    /// Builds the subscription filter these settings describe.
    pub fn subscription_spec(&self) -> SubscriptionSpec {
        SubscriptionSpec {
            device_type: to_filter(&self.device_type),
            device_id: to_filter(&self.device_id),
            event_name: to_filter(&self.event_name),
        }
    }
}

fn to_filter(field: &Option<String>) -> Filter {
    match field {
        Some(value) => Filter::exact(value),
        None => Filter::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.role, Role::Device);
    }

    #[test]
    fn test_device_role_requires_device_section() {
        let config = AgentConfig {
            role: Role::Device,
            device: None,
            application: None,
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[agent.device]"));
    }

    #[test]
    fn test_application_role_requires_application_section() {
        let config = AgentConfig {
            role: Role::Application,
            device: None,
            application: None,
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[agent.application]"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = AgentConfig {
            device: Some(DeviceSettings {
                interval_secs: 0,
                ..DeviceSettings::default()
            }),
            ..AgentConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 1 second"));
    }

    #[test]
    fn test_roles_deserialize_from_toml() {
        let config: AgentConfig = toml::from_str(
            r#"
            role = "application"

            [application]
            device_type = "generator"
            "#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Application);
        let spec = config.application.unwrap().subscription_spec();
        assert_eq!(spec.device_type, Filter::exact("generator"));
        assert_eq!(spec.device_id, Filter::Any);
    }

    #[test]
    fn test_empty_application_section_matches_everything() {
        let spec = ApplicationSettings::default().subscription_spec();
        assert_eq!(spec.to_topic_filter(), "iot/type/+/id/+/evt/+/fmt/+");
    }

    #[test]
    fn test_quality_deserializes_from_snake_case() {
        let settings: DeviceSettings = toml::from_str(
            r#"
            quality = "at_most_once"
            "#,
        )
        .unwrap();

        assert_eq!(settings.quality, DeliveryQuality::AtMostOnce);
    }
}
