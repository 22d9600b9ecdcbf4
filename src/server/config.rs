//! Server configuration
//!
//! Loads settings from an optional `config.toml` with `PORTICO_*`
//! environment overrides, falling back to built-in defaults.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Default TCP port the server listens on
pub const DEFAULT_PORT: u16 = 51220;

/// Default grace period granted to sessions at shutdown
pub const DEFAULT_DISCONNECTION_TIMEOUT_MS: u64 = 15_000;

/// Default size of a single receive
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Server configuration structure
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or IP address to bind
    pub bind_address: String,

    /// TCP port to bind; 0 selects an ephemeral port
    pub port: u16,

    /// How long shutdown waits for sessions before forcing them closed
    pub disconnection_timeout_ms: u64,

    /// Upper bound on the bytes returned by one `Client::receive`
    pub receive_buffer_size: usize,

    /// Name of the bundled protocol the binary serves
    pub protocol: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            disconnection_timeout_ms: DEFAULT_DISCONNECTION_TIMEOUT_MS,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            protocol: "echo".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `config.toml` (optional) with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from the named file (extension optional) with environment overrides
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("PORTICO"))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration bound to loopback on an ephemeral port
    pub fn local() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..Self::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_disconnection_timeout(mut self, timeout: Duration) -> Self {
        self.disconnection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Get bind address and port as a `host:port` endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Get the disconnection timeout as Duration
    pub fn disconnection_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnection_timeout_ms)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "bind_address cannot be empty".into(),
            ));
        }

        if self.disconnection_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "disconnection_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.receive_buffer_size == 0 {
            return Err(config::ConfigError::Message(
                "receive_buffer_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 51220);
        assert_eq!(config.disconnection_timeout(), Duration::from_millis(15_000));
        assert_eq!(config.endpoint(), "0.0.0.0:51220");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn local_uses_ephemeral_loopback() {
        let config = ServerConfig::local();
        assert_eq!(config.endpoint(), "127.0.0.1:0");
    }

    #[test]
    fn builder_style_setters() {
        let config = ServerConfig::local()
            .with_port(4000)
            .with_disconnection_timeout(Duration::from_millis(250))
            .with_receive_buffer_size(16);
        assert_eq!(config.port, 4000);
        assert_eq!(config.disconnection_timeout_ms, 250);
        assert_eq!(config.receive_buffer_size, 16);
    }

    #[test]
    fn oversized_timeout_saturates() {
        let config = ServerConfig::local().with_disconnection_timeout(Duration::MAX);
        assert_eq!(config.disconnection_timeout_ms, u64::MAX);
    }

    #[test]
    fn rejects_zero_buffer_and_timeout() {
        assert!(ServerConfig::local().with_receive_buffer_size(0).validate().is_err());
        assert!(
            ServerConfig::local()
                .with_disconnection_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(ServerConfig::local().with_bind_address(" ").validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load_from("definitely-not-a-config-file").unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
