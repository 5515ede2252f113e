//! Server configuration
//!
//! Read from `HUB_*` environment variables, with the bind address also
//! accepted as the first command-line argument.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Router inbound channel bound. Pumps block when it is full.
pub const DEFAULT_ROUTER_CAPACITY: usize = 4096;

/// Per-connection outbound mailbox bound. The hub drops frames past it.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Upper bound on a single frame write
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub router_capacity: usize,
    pub mailbox_capacity: usize,
    pub send_timeout: Duration,
    /// Only this `Origin` may upgrade, when set
    pub allowed_origin: Option<String>,
    /// JSON object of session token -> user id, loaded at startup
    pub sessions_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            router_capacity: DEFAULT_ROUTER_CAPACITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            allowed_origin: None,
            sessions_file: None,
        }
    }
}

impl ServerConfig {
    /// Load from the process environment and command line
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let mut config = Self::from_vars(&vars)?;

        if let Some(addr) = env::args().nth(1) {
            config.addr = addr;
        }

        Ok(config)
    }

    /// Build from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = vars.get("HUB_ADDR") {
            config.addr = addr.clone();
        }
        if let Some(value) = vars.get("HUB_ROUTER_CAPACITY") {
            config.router_capacity = parse_capacity("HUB_ROUTER_CAPACITY", value)?;
        }
        if let Some(value) = vars.get("HUB_MAILBOX_CAPACITY") {
            config.mailbox_capacity = parse_capacity("HUB_MAILBOX_CAPACITY", value)?;
        }
        if let Some(value) = vars.get("HUB_SEND_TIMEOUT_MS") {
            let millis = parse_capacity("HUB_SEND_TIMEOUT_MS", value)?;
            config.send_timeout = Duration::from_millis(millis as u64);
        }

        config.allowed_origin = vars
            .get("HUB_ALLOWED_ORIGIN")
            .filter(|o| !o.is_empty())
            .cloned();
        config.sessions_file = vars
            .get("HUB_SESSIONS_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    /// Read the configured sessions file, if any
    pub fn load_sessions(&self) -> Result<HashMap<String, String>, ConfigError> {
        let Some(path) = &self.sessions_file else {
            return Ok(HashMap::new());
        };
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Parse a strictly positive number
fn parse_capacity(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.router_capacity, DEFAULT_ROUTER_CAPACITY);
        assert_eq!(config.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert!(config.allowed_origin.is_none());
        assert!(config.sessions_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_vars(&vars(&[
            ("HUB_ADDR", "0.0.0.0:9000"),
            ("HUB_MAILBOX_CAPACITY", "8"),
            ("HUB_SEND_TIMEOUT_MS", "250"),
            ("HUB_ALLOWED_ORIGIN", "http://localhost:8080"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(
            config.allowed_origin.as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ServerConfig::from_vars(&vars(&[("HUB_ROUTER_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "HUB_ROUTER_CAPACITY",
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_capacity_rejected() {
        assert!(ServerConfig::from_vars(&vars(&[("HUB_MAILBOX_CAPACITY", "lots")])).is_err());
    }

    #[test]
    fn test_no_sessions_file_loads_empty() {
        let config = ServerConfig::default();
        assert!(config.load_sessions().unwrap().is_empty());
    }
}
