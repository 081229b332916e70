//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::stroke::Rgb;

/// Default relay endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the board controller and its sync channel.
///
/// Every field is optional in the JSON form; missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// WebSocket endpoint of the relay.
    pub server_url: String,
    /// Pointer moves shorter than this (in pixels) add no point.
    pub min_move_distance: f64,
    /// Outbound events held while offline before reporting overflow.
    pub max_outbound_queue: usize,
    /// Oldest allowed age of a queued event before reporting overflow.
    pub max_queue_age_ms: u64,
    /// First retry delay after a failed send or connect.
    pub backoff_initial_ms: u64,
    /// Upper bound on the retry delay.
    pub backoff_max_ms: u64,
    /// Initial pen color.
    pub default_color: Rgb,
    /// Initial stroke width.
    pub default_width: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            min_move_distance: 2.0,
            max_outbound_queue: 500,
            max_queue_age_ms: 30_000,
            backoff_initial_ms: 250,
            backoff_max_ms: 10_000,
            default_color: Rgb::black(),
            default_width: 3.0,
        }
    }
}

impl BoardConfig {
    /// Parse from JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_move_distance.is_finite() && self.min_move_distance >= 0.0) {
            return Err(ConfigError::Invalid("min_move_distance must be >= 0".to_string()));
        }
        if self.max_outbound_queue == 0 {
            return Err(ConfigError::Invalid("max_outbound_queue must be > 0".to_string()));
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "backoff_initial_ms must be in 1..=backoff_max_ms".to_string(),
            ));
        }
        if !(self.default_width.is_finite() && self.default_width > 0.0) {
            return Err(ConfigError::Invalid("default_width must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn max_queue_age(&self) -> Duration {
        Duration::from_millis(self.max_queue_age_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = BoardConfig::from_json_str(r#"{"max_outbound_queue": 10}"#).unwrap();
        assert_eq!(config.max_outbound_queue, 10);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.backoff_initial(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            BoardConfig::from_json_str(r#"{"max_outbound_queue": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BoardConfig::from_json_str(r#"{"backoff_initial_ms": 20000}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(BoardConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r##"{{"default_color": "#ff8800", "min_move_distance": 0.5}}"##).unwrap();

        let config = BoardConfig::load(file.path()).unwrap();
        assert_eq!(config.default_color, Rgb::new(0xff, 0x88, 0x00));
        assert!((config.min_move_distance - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(BoardConfig::load("/nonexistent/inkboard.json"), Err(ConfigError::Io(_))));
    }
}
