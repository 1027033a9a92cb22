//! Layered application configuration
//!
//! Priority (lowest to highest): defaults, profile config
//! (~/.opencortex/opencortex.json), CLI-specified or local config file,
//! CLI arguments (which include env var fallbacks via clap).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_HOST, DEFAULT_LEASE_SECS,
    DEFAULT_LONG_POLL_MAX_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_LEASE_SECS,
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_PORT, DEFAULT_RATE_LIMIT_RPM, DEFAULT_SWEEP_INTERVAL_SECS,
};

/// Server binding configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr_display(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Returns true when the host binds every interface
pub fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::" || host == "[::]"
}

/// Broker tunables: payload ceiling, lease bounds, redelivery, sweeping
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub max_payload_bytes: usize,
    pub default_lease: Duration,
    pub max_lease: Duration,
    pub max_attempts: u32,
    pub sweep_interval: Duration,
    pub long_poll_max: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            default_lease: Duration::from_secs(DEFAULT_LEASE_SECS),
            max_lease: Duration::from_secs(DEFAULT_MAX_LEASE_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            long_poll_max: Duration::from_secs(DEFAULT_LONG_POLL_MAX_SECS),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpm: DEFAULT_RATE_LIMIT_RPM,
        }
    }
}

/// Fully resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub rate_limit: RateLimitConfig,
}

// File config mirrors AppConfig with everything optional so layers merge.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    server: Option<FileServerConfig>,
    broker: Option<FileBrokerConfig>,
    rate_limit: Option<FileRateLimitConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBrokerConfig {
    max_payload_bytes: Option<usize>,
    default_lease_secs: Option<u64>,
    max_lease_secs: Option<u64>,
    max_attempts: Option<u32>,
    sweep_interval_secs: Option<u64>,
    long_poll_max_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRateLimitConfig {
    enabled: Option<bool>,
    rpm: Option<u32>,
}

impl FileConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn merge(&mut self, overlay: FileConfig) {
        if overlay.server.is_some() {
            self.server = overlay.server;
        }
        if overlay.broker.is_some() {
            self.broker = overlay.broker;
        }
        if overlay.rate_limit.is_some() {
            self.rate_limit = overlay.rate_limit;
        }
    }
}

fn profile_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Load configuration from all sources
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = profile_config_path()
            && profile_path.exists()
        {
            file_config.merge(FileConfig::load_from_file(&profile_path)?);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            file_config.merge(FileConfig::load_from_file(&path)?);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let file_server = file_config.server.unwrap_or_default();
        let file_broker = file_config.broker.unwrap_or_default();
        let file_rate_limit = file_config.rate_limit.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let broker = BrokerConfig {
            max_payload_bytes: cli
                .max_payload_bytes
                .or(file_broker.max_payload_bytes)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            default_lease: Duration::from_secs(
                cli.default_lease_secs
                    .or(file_broker.default_lease_secs)
                    .unwrap_or(DEFAULT_LEASE_SECS)
                    .max(1),
            ),
            max_lease: Duration::from_secs(
                cli.max_lease_secs
                    .or(file_broker.max_lease_secs)
                    .unwrap_or(DEFAULT_MAX_LEASE_SECS)
                    .max(1),
            ),
            max_attempts: cli
                .max_attempts
                .or(file_broker.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1),
            sweep_interval: Duration::from_secs(
                cli.sweep_interval_secs
                    .or(file_broker.sweep_interval_secs)
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                    .max(1),
            ),
            long_poll_max: Duration::from_secs(
                file_broker
                    .long_poll_max_secs
                    .unwrap_or(DEFAULT_LONG_POLL_MAX_SECS)
                    .max(1),
            ),
        };

        if broker.default_lease > broker.max_lease {
            anyhow::bail!(
                "default_lease_secs ({}) exceeds max_lease_secs ({})",
                broker.default_lease.as_secs(),
                broker.max_lease.as_secs()
            );
        }

        let rate_limit = RateLimitConfig {
            enabled: cli
                .rate_limit
                .or(file_rate_limit.enabled)
                .unwrap_or(true),
            rpm: cli
                .rate_limit_rpm
                .or(file_rate_limit.rpm)
                .unwrap_or(DEFAULT_RATE_LIMIT_RPM)
                .max(1),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            broker,
            rate_limit,
        })
    }
}
