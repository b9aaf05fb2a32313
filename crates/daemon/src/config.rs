//! Configuration management for the TermBridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbridge/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionSettings;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("channel_capacity must be between 1 and 65536, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for per-channel queue capacity.
const MAX_CHANNEL_CAPACITY: usize = 65536;

/// Main configuration structure for the TermBridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and logging configuration.
    pub server: ServerConfig,

    /// Session configuration.
    pub session: SessionConfig,
}

/// Listener and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_address: String,

    /// Port the WebSocket listener binds to.
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell used to run commands (`<shell> -c <command>`).
    pub shell: String,

    /// Queue capacity of every output channel.
    pub channel_capacity: usize,

    /// Directory receiving one output log per context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            channel_capacity: crate::session::DEFAULT_CHANNEL_CAPACITY,
            output_log_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbridge")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

impl ServerConfig {
    /// Returns the socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl SessionConfig {
    /// Returns the settings handed to each new session.
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            channel_capacity: self.channel_capacity,
            output_log_dir: self.output_log_dir.clone(),
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMBRIDGE_BIND_ADDRESS: Override listener address
    /// - TERMBRIDGE_PORT: Override listener port
    /// - TERMBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("TERMBRIDGE_BIND_ADDRESS") {
            if !address.is_empty() {
                tracing::info!("Overriding bind_address from environment: {}", address);
                self.server.bind_address = address;
            }
        }

        if let Ok(port) = std::env::var("TERMBRIDGE_PORT") {
            if !port.is_empty() {
                match port.parse() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid TERMBRIDGE_PORT value: {}", port);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("TERMBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        self.server.socket_addr()?;

        let capacity = self.session.channel_capacity;
        if !(1..=MAX_CHANNEL_CAPACITY).contains(&capacity) {
            return Err(ConfigError::InvalidChannelCapacity(capacity));
        }

        let shell_path = Path::new(&self.session.shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        } else if which::which(&self.session.shell).is_err() {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.session.shell = "/bin/sh".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.session.channel_capacity, 1024);
        assert!(config.session.output_log_dir.is_none());
        assert!(!config.session.shell.is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 9000
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.session.channel_capacity, 1024);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
bind_address = "0.0.0.0"
port = 7070
log_level = "debug"

[session]
shell = "/bin/bash"
channel_capacity = 64
output_log_dir = "/var/log/termbridge"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.session.shell, "/bin/bash");
        assert_eq!(config.session.channel_capacity, 64);
        assert_eq!(
            config.session.output_log_dir,
            Some(PathBuf::from("/var/log/termbridge"))
        );
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
port = 1
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
port = "eighty"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[server]
port = 8081
flavour = "vanilla"

[extra]
key = 1
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 8081);
    }

    #[test]
    fn test_roundtrip() {
        let mut original = valid_config();
        original.server.port = 4242;
        original.session.output_log_dir = Some(PathBuf::from("/tmp/logs"));

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[session]"));

        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = valid_config();
        config.server.log_level = "warn".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not [valid toml").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("termbridge/config.toml"));
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::default();
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_session_settings() {
        let mut config = SessionConfig::default();
        config.channel_capacity = 8;
        config.output_log_dir = Some(PathBuf::from("/tmp/x"));

        let settings = config.settings();
        assert_eq!(settings.channel_capacity, 8);
        assert_eq!(settings.output_log_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_validate_default_shell_config() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = valid_config();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = valid_config();
        config.server.bind_address = "localhost:80".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost:80".to_string()))
        );
    }

    #[test]
    fn test_validate_channel_capacity_bounds() {
        let mut config = valid_config();

        config.session.channel_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChannelCapacity(0)));

        config.session.channel_capacity = 65537;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChannelCapacity(65537))
        );

        config.session.channel_capacity = 1;
        assert!(config.validate().is_ok());

        config.session.channel_capacity = 65536;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_shell() {
        let mut config = valid_config();

        config.session.shell = "/nonexistent/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/nonexistent/shell".to_string()))
        );

        config.session.shell = "definitely-not-a-shell-xyz".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));

        config.session.shell = "sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = valid_config();

        config.server.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.server.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_port_and_address() {
        std::env::set_var("TERMBRIDGE_BIND_ADDRESS", "0.0.0.0");
        std::env::set_var("TERMBRIDGE_PORT", "9999");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMBRIDGE_BIND_ADDRESS");
        std::env::remove_var("TERMBRIDGE_PORT");

        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        std::env::set_var("TERMBRIDGE_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMBRIDGE_PORT");

        assert_eq!(config.server.port, 8080);
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("TERMBRIDGE_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMBRIDGE_LOG_LEVEL");

        assert_eq!(config.server.log_level, "trace");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("TERMBRIDGE_BIND_ADDRESS", "");
        std::env::set_var("TERMBRIDGE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TERMBRIDGE_BIND_ADDRESS");
        std::env::remove_var("TERMBRIDGE_LOG_LEVEL");

        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.log_level, "info");
    }
}
