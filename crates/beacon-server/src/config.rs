//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config`, or the first of the default paths)
//! - Environment variables (`BEACON_PORT`, `BEACON_LIMITS__MAX_CLIENTS`, ...)

use anyhow::{bail, Context, Result};
use beacon_core::RegistryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Path prefixes served by the admin API.
const RESERVED_PREFIXES: [&str; 2] = ["/clients", "/health"];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Registry behaviour.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix for WebSocket endpoints; clients connect to `{path}/{id}`.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Registry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Create unknown clients when they connect.
    #[serde(default = "default_true")]
    pub auto_create: bool,

    /// Close a client's socket when the client is deleted.
    #[serde(default = "default_true")]
    pub close_on_delete: bool,

    /// Delivery timeout in milliseconds (0 disables).
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Maximum message size in bytes, both directions.
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
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_send_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_max_clients() -> usize {
    100_000
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
            transport: TransportConfig::default(),
            registry: RegistrySettings::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            auto_create: true,
            close_on_delete: true,
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
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
    /// Load configuration from `path`, or the first default path that
    /// exists, then apply `BEACON_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            info!("Loading configuration from {}", file.display());
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("BEACON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Config>()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check settings that would otherwise fail when the server starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket path is malformed or overlaps the
    /// admin API routes.
    pub fn validate(&self) -> Result<()> {
        let raw = &self.transport.websocket_path;
        if !raw.starts_with('/') {
            bail!("transport.websocket_path must start with '/': {:?}", raw);
        }

        let path = raw.trim_end_matches('/');
        if path.is_empty() {
            bail!("transport.websocket_path must not be the root path");
        }
        if path.contains([':', '*', '{', '}']) {
            bail!("transport.websocket_path must not contain route parameters: {:?}", raw);
        }
        if let Some(prefix) = RESERVED_PREFIXES
            .iter()
            .find(|p| path == **p || path.starts_with(&format!("{}/", p)))
        {
            bail!("transport.websocket_path {:?} overlaps the {} routes", raw, prefix);
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
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

    /// Route pattern for the WebSocket endpoint.
    #[must_use]
    pub fn websocket_route(&self) -> String {
        format!("{}/:id", self.transport.websocket_path.trim_end_matches('/'))
    }

    /// Registry configuration derived from these settings.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_clients: self.limits.max_clients,
            send_timeout: (self.registry.send_timeout_ms > 0)
                .then(|| Duration::from_millis(self.registry.send_timeout_ms)),
            close_on_delete: self.registry.close_on_delete,
            max_message_size: self.limits.max_message_size,
        }
    }
}
