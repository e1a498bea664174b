//! Configuration loading
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, method={}, udp={}",
        config.listen.address, config.method.method, config.listen.udp_enabled
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `SS_RELAY_LISTEN_ADDR`: Override listen address
/// - `SS_RELAY_LOG_LEVEL`: Override log level
/// - `SS_RELAY_METHOD`: Override method name
/// - `SS_RELAY_PASSWORD`: Override password
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply overrides from a variable lookup
fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("SS_RELAY_LISTEN_ADDR") {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "SS_RELAY_LISTEN_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Some(level) = lookup("SS_RELAY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(method) = lookup("SS_RELAY_METHOD") {
        config.method.method = method.parse().map_err(|e| ConfigError::EnvError {
            name: "SS_RELAY_METHOD".into(),
            reason: format!("{e}"),
        })?;
        debug!("Method overridden to {}", config.method.method);
    }

    if let Some(password) = lookup("SS_RELAY_PASSWORD") {
        config.method.password = Some(password);
        debug!("Password overridden from environment");
    }

    Ok(())
}

/// Write a default configuration file to the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodKind;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config() {
        let file = create_temp_config();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.method.method, MethodKind::None);
        assert_eq!(config.listen.address.port(), 8388);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_str() {
        let json = r#"{
            "listen": { "address": "127.0.0.1:8388", "udp_timeout_secs": 60 },
            "method": { "method": "none" },
            "log": { "level": "debug" }
        }"#;
        let config = load_config_str(json).unwrap();
        assert_eq!(config.listen.udp_timeout_secs, 60);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_load_config_invalid_json() {
        let result = load_config_str("not valid json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_unsupported_method() {
        let json = r#"{
            "listen": { "address": "127.0.0.1:8388" },
            "method": { "method": "aes-128-gcm", "password": "secret" }
        }"#;
        assert!(matches!(
            load_config_str(json),
            Err(ConfigError::Method(_))
        ));
    }

    #[test]
    fn test_create_default_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        create_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.listen.udp_enabled);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SS_RELAY_LISTEN_ADDR", "127.0.0.1:9000"),
            ("SS_RELAY_LOG_LEVEL", "trace"),
            ("SS_RELAY_PASSWORD", "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default_config();
        apply_env_overrides(&mut config, |name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.listen.address, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.method.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_env_override_invalid_address() {
        let mut config = Config::default_config();
        let result = apply_env_overrides(&mut config, |name| {
            (name == "SS_RELAY_LISTEN_ADDR").then(|| "not-an-address".to_string())
        });
        assert!(matches!(result, Err(ConfigError::EnvError { .. })));
    }

    #[test]
    fn test_env_override_method() {
        let mut config = Config::default_config();
        let result = apply_env_overrides(&mut config, |name| {
            (name == "SS_RELAY_METHOD").then(|| "rot13".to_string())
        });
        assert!(matches!(result, Err(ConfigError::EnvError { ref name, .. }) if name == "SS_RELAY_METHOD"));
    }
}
