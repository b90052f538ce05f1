//! Bridge configuration.
//!
//! [`BridgeConfig`] collects everything needed to reach a broker and run
//! the bridge: organization and identity, credentials, transport tuning,
//! queue sizing and the reconnect policy. Configs deserialize from TOML
//! and validate with the `validator` crate, so a broken file fails at
//! load time with a report naming every bad field at once rather than
//! failing one field per restart.
//!
//! # Identity
//!
//! Exactly one identity must be present. A `[device]` table makes the
//! bridge publish as that device; an `[application]` table makes it a
//! backend consumer with its own API key. The identity decides the
//! client id and credential layout used on the wire.
//!
//! # Example
//!
//! ```toml
//! org_id = "acme"
//! auth_token = "s3cret"
//! host = "broker.acme.example"
//! port = 8883
//!
//! [device]
//! device_type = "thermostat"
//! device_id = "t-01"
//!
//! [tls]
//! ca_cert_path = "/etc/hivelink/ca.pem"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::error::ConfigError;

/// Username sent for token-authenticated devices.
pub const TOKEN_AUTH_USERNAME: &str = "use-token-auth";

/// Everything the bridge needs to connect and run.
///
/// All fields carry validation constraints. Call [`Validate::validate`]
/// after construction, or use [`BridgeConfig::from_toml_str`] which
/// validates for you.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_identity_and_delays", skip_on_field_errors = false))]
pub struct BridgeConfig {
    /// Organization the identity belongs to. Becomes part of the client
    /// id, so two organizations never collide on a shared broker.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Organization id must be between 1 and 36 characters"
    ))]
    pub org_id: String,

    /// Authentication token paired with the identity.
    ///
    /// Devices present it as their password; applications pair it with
    /// their API key. Never log this value.
    #[validate(length(min = 1, message = "Auth token must not be empty"))]
    pub auth_token: String,

    /// Device identity. Mutually exclusive with `application`.
    #[validate(nested)]
    pub device: Option<DeviceIdentity>,

    /// Application identity. Mutually exclusive with `device`.
    #[validate(nested)]
    pub application: Option<ApplicationIdentity>,

    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port. 1883 for plain TCP, 8883 for TLS.
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// How long one connection attempt may take before the supervisor
    /// treats it as failed and backs off.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connect timeout must be between 1 and 300 seconds"
    ))]
    pub connect_timeout_secs: u64,

    /// Keep-alive interval. The client pings at this cadence when idle
    /// and the broker drops the session after missing activity.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive_secs: u64,

    /// Whether the broker should discard session state between
    /// connections. The bridge queues undelivered events locally, so a
    /// clean session is the default.
    pub clean_session: bool,

    /// Maximum number of unacknowledged publishes in flight at once.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// Optional TLS settings. Absent means plain TCP.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,

    /// Capacity of the outbound event queue.
    ///
    /// When the queue is full, at-most-once sends evict the oldest
    /// best-effort entry and at-least-once sends wait for space.
    #[validate(range(
        min = 1,
        max = 65536,
        message = "Queue capacity must be between 1 and 65536"
    ))]
    pub queue_capacity: usize,

    /// How long an at-least-once send waits for the broker
    /// acknowledgement before reporting a timeout.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Publish timeout must be between 1 and 300 seconds"
    ))]
    pub publish_timeout_secs: u64,

    /// How long one inbound handler may run before it is abandoned and
    /// counted as failed.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Handler timeout must be between 1 and 3600 seconds"
    ))]
    pub handler_timeout_secs: u64,

    /// First reconnect delay. Later delays double up to the maximum.
    #[validate(range(
        min = 0.1,
        max = 60.0,
        message = "Initial reconnect delay must be between 0.1 and 60 seconds"
    ))]
    pub initial_reconnect_delay_secs: f64,

    /// Ceiling for reconnect delays.
    #[validate(range(
        min = 0.1,
        max = 3600.0,
        message = "Max reconnect delay must be between 0.1 and 3600 seconds"
    ))]
    pub max_reconnect_delay_secs: f64,

    /// How many consecutive failed attempts before giving up with an
    /// exhaustion error. Zero retries forever.
    #[validate(range(
        min = 0,
        max = 1000,
        message = "Max reconnect attempts must be between 0 and 1000"
    ))]
    pub max_reconnect_attempts: u32,
}

impl Default for BridgeConfig {
    /// Defaults suitable for a local development broker. `org_id`,
    /// `auth_token` and an identity still have to be filled in before
    /// the config validates.
    fn default() -> Self {
        Self {
            org_id: String::new(),
            auth_token: String::new(),
            device: None,
            application: None,
            host: "localhost".to_string(),
            port: 1883,
            connect_timeout_secs: 30,
            keep_alive_secs: 60,
            clean_session: true,
            max_inflight: 32,
            tls: None,
            queue_capacity: 64,
            publish_timeout_secs: 10,
            handler_timeout_secs: 30,
            initial_reconnect_delay_secs: 1.0,
            max_reconnect_delay_secs: 16.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Whether this bridge runs under a device identity.
    pub fn is_device(&self) -> bool {
        self.device.is_some()
    }

    /// Client id presented to the broker.
    ///
    /// Devices identify as `d:{org}:{type}:{id}`, applications as
    /// `a:{org}:{app_id}`. A config with no identity, which validation
    /// rejects, falls back to a random application id.
    pub fn client_id(&self) -> String {
        if let Some(device) = &self.device {
            format!(
                "d:{}:{}:{}",
                self.org_id, device.device_type, device.device_id
            )
        } else if let Some(application) = &self.application {
            format!("a:{}:{}", self.org_id, application.app_id)
        } else {
            format!("a:{}:{}", self.org_id, uuid::Uuid::new_v4())
        }
    }

    /// Username and password for the CONNECT packet.
    ///
    /// Devices authenticate with the fixed token username and their
    /// token; applications with their API key and token.
    pub fn broker_credentials(&self) -> (String, String) {
        match &self.application {
            Some(application) => (application.api_key.clone(), self.auth_token.clone()),
            None => (TOKEN_AUTH_USERNAME.to_string(), self.auth_token.clone()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_reconnect_delay_secs)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_reconnect_delay_secs)
    }
}

/// Identity of a device publishing its own events.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceIdentity {
    /// Device class, e.g. `"thermostat"`. Part of every topic this
    /// device publishes on.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Device type must be between 1 and 36 characters"
    ))]
    pub device_type: String,

    /// Instance id within the class.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Device id must be between 1 and 36 characters"
    ))]
    pub device_id: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_type: String::new(),
            device_id: String::new(),
        }
    }
}

/// Identity of a backend application consuming device events.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApplicationIdentity {
    /// Application name, unique within the organization.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Application id must be between 1 and 36 characters"
    ))]
    pub app_id: String,

    /// API key presented as the username.
    #[validate(length(min = 1, message = "API key must not be empty"))]
    pub api_key: String,
}

impl Default for ApplicationIdentity {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_key: String::new(),
        }
    }
}

/// TLS settings for the broker connection.
///
/// Paths are checked at validation time so a missing certificate shows
/// up in the config error report, not as a connect failure later.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate used to verify the broker, PEM format. Required
    /// for any TLS connection.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate for mutual TLS, PEM format. Must be paired
    /// with `client_key_path`.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Client private key for mutual TLS, PEM format, unencrypted.
    /// Must be paired with `client_cert_path`. Keep the file private.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

impl TlsConfig {
    /// TLS with CA verification only, no client authentication.
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: None,
            client_key_path: None,
        }
    }

    /// TLS with full mutual authentication.
    pub fn with_client_auth(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    /// Whether both halves of the client credential pair are present.
    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// Structural check beyond per-field validation: the CA must be set
    /// and client cert and key must come as a pair or not at all.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        if self.ca_cert_path.is_none() {
            return Err(ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required for TLS".into()));
        }

        if !self.has_client_auth()
            && (self.client_cert_path.is_some() || self.client_key_path.is_some())
        {
            return Err(ValidationError::new("incomplete_client_auth").with_message(
                "Both client certificate and key must be provided, or neither".into(),
            ));
        }

        Ok(())
    }
}

/// Cross-field rules the derive cannot express: exactly one identity,
/// and a reconnect delay window that is not inverted.
fn validate_identity_and_delays(config: &BridgeConfig) -> Result<(), ValidationError> {
    match (&config.device, &config.application) {
        (None, None) => {
            return Err(ValidationError::new("missing_identity").with_message(
                "Either a [device] or an [application] identity is required".into(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(ValidationError::new("conflicting_identity").with_message(
                "A bridge cannot hold both a [device] and an [application] identity".into(),
            ));
        }
        _ => {}
    }

    if config.max_reconnect_delay_secs < config.initial_reconnect_delay_secs {
        return Err(ValidationError::new("inverted_reconnect_window").with_message(
            "Max reconnect delay must not be smaller than the initial delay".into(),
        ));
    }

    Ok(())
}

/// Validates that an optional file path points at an existing file.
fn validate_optional_file_exists(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);
    if !path_obj.is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;

    /// Temporary certificate files, removed when dropped.
    struct TestFiles {
        _temp_dir: TempDir,
        ca_cert: String,
        client_cert: String,
        client_key: String,
    }

    impl TestFiles {
        fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;

            let ca_cert = temp_dir.path().join("ca.pem");
            let client_cert = temp_dir.path().join("client.crt");
            let client_key = temp_dir.path().join("client.key");

            File::create(&ca_cert)?.write_all(b"ca certificate content")?;
            File::create(&client_cert)?.write_all(b"client certificate content")?;
            File::create(&client_key)?.write_all(b"client key content")?;

            Ok(TestFiles {
                _temp_dir: temp_dir,
                ca_cert: ca_cert.to_string_lossy().into_owned(),
                client_cert: client_cert.to_string_lossy().into_owned(),
                client_key: client_key.to_string_lossy().into_owned(),
            })
        }
    }

    fn device_config() -> BridgeConfig {
        BridgeConfig {
            org_id: "acme".to_string(),
            auth_token: "s3cret".to_string(),
            device: Some(DeviceIdentity {
                device_type: "thermostat".to_string(),
                device_id: "t-01".to_string(),
            }),
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_empty_config_reports_every_missing_field() {
        let config = BridgeConfig::default();
        let errors = config.validate().unwrap_err();

        let fields = errors.field_errors();
        assert!(fields.contains_key("org_id"));
        assert!(fields.contains_key("auth_token"));
        // The identity rule is a cross-field check and lands under the
        // schema key.
        assert!(errors.errors().contains_key("__all__"));
    }

    #[test]
    fn test_device_config_validates() {
        assert!(device_config().validate().is_ok());
    }

    #[test]
    fn test_both_identities_rejected() {
        let mut config = device_config();
        config.application = Some(ApplicationIdentity {
            app_id: "dashboard".to_string(),
            api_key: "a-key".to_string(),
        });

        let errors = config.validate().unwrap_err();
        assert!(errors.to_string().contains("cannot hold both"));
    }

    #[test]
    fn test_inverted_delay_window_rejected() {
        let mut config = device_config();
        config.initial_reconnect_delay_secs = 8.0;
        config.max_reconnect_delay_secs = 2.0;

        let errors = config.validate().unwrap_err();
        assert!(errors.to_string().contains("Max reconnect delay"));
    }

    #[test]
    fn test_device_client_id_and_credentials() {
        let config = device_config();
        assert_eq!(config.client_id(), "d:acme:thermostat:t-01");
        assert_eq!(
            config.broker_credentials(),
            (TOKEN_AUTH_USERNAME.to_string(), "s3cret".to_string())
        );
        assert!(config.is_device());
    }

    #[test]
    fn test_application_client_id_and_credentials() {
        let config = BridgeConfig {
            org_id: "acme".to_string(),
            auth_token: "s3cret".to_string(),
            application: Some(ApplicationIdentity {
                app_id: "dashboard".to_string(),
                api_key: "a-key".to_string(),
            }),
            ..BridgeConfig::default()
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.client_id(), "a:acme:dashboard");
        assert_eq!(
            config.broker_credentials(),
            ("a-key".to_string(), "s3cret".to_string())
        );
        assert!(!config.is_device());
    }

    #[test]
    fn test_missing_tls_files_rejected() {
        let mut config = device_config();
        config.tls = Some(TlsConfig::with_ca_only("/nonexistent/ca.pem"));

        let errors = config.validate().unwrap_err();
        assert!(errors.to_string().contains("CA certificate"));
    }

    #[test]
    fn test_existing_tls_files_accepted() {
        let test_files = TestFiles::new().expect("Failed to create test files");

        let mut config = device_config();
        config.tls = Some(TlsConfig::with_client_auth(
            &test_files.ca_cert,
            &test_files.client_cert,
            &test_files.client_key,
        ));

        assert!(config.validate().is_ok());
        assert!(config.tls.as_ref().unwrap().has_client_auth());
    }

    #[test]
    fn test_partial_client_auth_rejected_structurally() {
        let test_files = TestFiles::new().expect("Failed to create test files");

        let tls = TlsConfig {
            ca_cert_path: Some(test_files.ca_cert.clone()),
            client_cert_path: Some(test_files.client_cert.clone()),
            client_key_path: None,
        };

        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "incomplete_client_auth");
    }

    #[test]
    fn test_minimal_toml_with_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            org_id = "acme"
            auth_token = "s3cret"

            [application]
            app_id = "dashboard"
            api_key = "a-key"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.publish_timeout_secs, 10);
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_invalid_toml_field_reported() {
        let err = BridgeConfig::from_toml_str(
            r#"
            org_id = "acme"
            auth_token = "s3cret"
            keep_alive_secs = 2

            [device]
            device_type = "thermostat"
            device_id = "t-01"
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("Keep alive"));
    }
}
