//! Server configuration from the environment.

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Per-room broadcast buffer. Receivers that fall further behind are
    /// disconnected and recover by resync.
    pub channel_capacity: usize,
}

impl ServerConfig {
    /// Read `INKBOARD_ADDR` and `INKBOARD_CHANNEL_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = lookup("INKBOARD_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr.parse().map_err(|_| ConfigError::Invalid {
            name: "INKBOARD_ADDR",
            value: addr.clone(),
        })?;

        let channel_capacity = match lookup("INKBOARD_CHANNEL_CAPACITY") {
            Some(value) => match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "INKBOARD_CHANNEL_CAPACITY",
                        value,
                    })
                }
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self { addr, channel_capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr.port(), 3030);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_overrides_and_errors() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("INKBOARD_ADDR", "127.0.0.1:9000"),
            ("INKBOARD_CHANNEL_CAPACITY", "8"),
        ]))
        .unwrap();
        assert_eq!(config.addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.channel_capacity, 8);

        assert!(ServerConfig::from_lookup(lookup(&[("INKBOARD_ADDR", "nowhere")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("INKBOARD_CHANNEL_CAPACITY", "0")])).is_err());
    }
}
