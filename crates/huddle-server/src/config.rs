//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - The first TOML file found among the default paths
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_POLL__TIMEOUT_MS`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tenvis_huddle_core::{RegistryConfig, WaiterPolicy};

/// Config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "HUDDLE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Long-poll configuration.
    #[serde(default)]
    pub poll: PollConfig,

    /// WebSocket configuration.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// How long a poll is held open before answering empty, in milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,

    /// What to do when a nick polls while its previous poll is still open.
    #[serde(default)]
    pub waiter_policy: WaiterPolicy,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Enable the WebSocket push endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of participants.
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Maximum chat message length in bytes.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_participants() -> usize {
    10_000
}

fn default_max_text_length() -> usize {
    4 * 1024 // 4 KB
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            poll: PollConfig::default(),
            websocket: WebSocketConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_poll_timeout(),
            waiter_policy: WaiterPolicy::default(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_participants: default_max_participants(),
            max_text_length: default_max_text_length(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        let mut builder = ::config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(::config::File::from(Path::new(path)));
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .with_context(|| match &file {
                Some(path) => format!("Invalid configuration in {path}"),
                None => "Invalid configuration".to_string(),
            })?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Get the long-poll deadline.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.timeout_ms)
    }

    /// Get the participant registry configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            poll_timeout: self.poll_timeout(),
            waiter_policy: self.poll.waiter_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8001);
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll.waiter_policy, WaiterPolicy::Replace);
        assert!(config.websocket.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8001);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [poll]
            timeout_ms = 5000
            waiter_policy = "reject"

            [limits]
            max_participants = 50
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_participants, 50);
        assert_eq!(config.limits.max_text_length, 4 * 1024);

        let registry = config.registry_config();
        assert_eq!(registry.poll_timeout, Duration::from_secs(5));
        assert_eq!(registry.waiter_policy, WaiterPolicy::Reject);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("huddle-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9100\n[websocket]\nenabled = false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 9100);
        assert!(!config.websocket.enabled);
        assert_eq!(config.websocket.path, "/ws");
    }

    #[test]
    fn test_config_from_missing_file() {
        assert!(Config::from_file("/nonexistent/huddle.toml").is_err());
    }
}
