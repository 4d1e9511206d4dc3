//! Bridge configuration.
//!
//! Every field has a default, so an empty (or missing) TOML file is a valid
//! configuration:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 7654
//!
//! [pump]
//! interval_ms = 200
//! stall_threshold_ms = 10000
//!
//! [errors]
//! history_capacity = 1000
//! breaker_threshold = 5
//! breaker_window_secs = 300
//! recent_window_secs = 3600
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BridgeError;

/// Upper bound for the error-handling windows.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub pump: PumpConfig,
    pub errors: ErrorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7654,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Minimum spacing between two drains of the task queue.
    pub interval_ms: u64,
    /// A drain running longer than this is reported as a stall by `/health`.
    pub stall_threshold_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            stall_threshold_ms: 10_000,
        }
    }
}

impl PumpConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub history_capacity: usize,
    pub breaker_threshold: u32,
    pub breaker_window_secs: u64,
    pub recent_window_secs: u64,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            breaker_threshold: 5,
            breaker_window_secs: 300,
            recent_window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.pump.interval_ms == 0 {
            return Err(BridgeError::Config("pump.interval_ms must be > 0".to_string()));
        }
        if self.errors.history_capacity == 0 {
            return Err(BridgeError::Config(
                "errors.history_capacity must be > 0".to_string(),
            ));
        }
        if self.errors.breaker_threshold == 0 {
            return Err(BridgeError::Config(
                "errors.breaker_threshold must be > 0".to_string(),
            ));
        }
        if self.errors.breaker_window_secs == 0 {
            return Err(BridgeError::Config(
                "errors.breaker_window_secs must be > 0".to_string(),
            ));
        }
        for (name, secs) in [
            ("errors.breaker_window_secs", self.errors.breaker_window_secs),
            ("errors.recent_window_secs", self.errors.recent_window_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(BridgeError::Config(format!(
                    "{name} must be at most {MAX_WINDOW_SECS} (one year)"
                )));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.pump.interval(), Duration::from_millis(200));
        assert_eq!(config.errors.breaker_threshold, 5);
        assert_eq!(config.bind_addr(), "127.0.0.1:7654");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [errors]
            breaker_window_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.errors.breaker_window_secs, 60);
        assert_eq!(config.errors.history_capacity, 1000);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = BridgeConfig::from_toml_str("[pump]\ninterval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn oversized_windows_are_rejected() {
        let err = BridgeConfig::from_toml_str("[errors]\nbreaker_window_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(err.to_string().contains("breaker_window_secs"));

        let err = BridgeConfig::from_toml_str("[errors]\nrecent_window_secs = 40000000\n").unwrap_err();
        assert!(err.to_string().contains("recent_window_secs"));

        let config = BridgeConfig::from_toml_str(&format!("[errors]\nbreaker_window_secs = {MAX_WINDOW_SECS}\n"));
        assert!(config.is_ok());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = BridgeConfig::from_toml_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
