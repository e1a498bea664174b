//! Configuration types for ss-relay
//!
//! Configuration is loaded from a JSON file and validated at startup, so a
//! bad method or missing password fails before any socket is opened.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::method::{create_method, Method, MethodKind};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration
    pub listen: ListenConfig,

    /// Encryption method and key material
    #[serde(default)]
    pub method: MethodConfig,

    /// Outbound (direct dispatch) settings
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any section is invalid or the method cannot
    /// be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.method.validate()?;
        self.outbound.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: ListenConfig::default(),
            method: MethodConfig::default(),
            outbound: OutboundConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address for both TCP and UDP (e.g., "0.0.0.0:8388")
    pub address: SocketAddr,

    /// Accept datagrams on the same port
    #[serde(default = "default_true")]
    pub udp_enabled: bool,

    /// UDP session idle timeout in seconds
    #[serde(default = "default_udp_timeout_secs")]
    pub udp_timeout_secs: u64,
}

impl ListenConfig {
    /// Create a listener configuration with defaults
    #[must_use]
    pub const fn new(address: SocketAddr) -> Self {
        Self {
            address,
            udp_enabled: true,
            udp_timeout_secs: default_udp_timeout_secs(),
        }
    }

    /// Enable or disable UDP
    #[must_use]
    pub const fn with_udp(mut self, enabled: bool) -> Self {
        self.udp_enabled = enabled;
        self
    }

    /// Set the UDP session idle timeout
    #[must_use]
    pub const fn with_udp_timeout_secs(mut self, secs: u64) -> Self {
        self.udp_timeout_secs = secs;
        self
    }

    /// UDP session idle timeout
    #[must_use]
    pub const fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout_secs)
    }

    /// Validate listen configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero UDP timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.udp_enabled && self.udp_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "udp_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 8388)))
    }
}

/// Method configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MethodConfig {
    /// Method name (e.g., "none", "aes-256-gcm")
    #[serde(default)]
    pub method: MethodKind,

    /// Password the key is derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl MethodConfig {
    /// Create a method configuration
    #[must_use]
    pub const fn new(method: MethodKind) -> Self {
        Self {
            method,
            password: None,
        }
    }

    /// Set the password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Build the configured method
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Method` if the key material is invalid or the
    /// method is not built in.
    pub fn build(&self) -> Result<Arc<dyn Method>, ConfigError> {
        Ok(create_method(self.method, self.password.as_deref(), None)?)
    }

    /// Validate method configuration
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(|_| ())
    }
}

/// Outbound settings for the direct handler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl OutboundConfig {
    /// Connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate outbound configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_udp_timeout_secs() -> u64 {
    300
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
