use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CONFIG, ENV_DEFAULT_LEASE_SECS, ENV_HOST, ENV_MAX_ATTEMPTS, ENV_MAX_LEASE_SECS,
    ENV_MAX_PAYLOAD_BYTES, ENV_PORT, ENV_RATE_LIMIT_ENABLED, ENV_RATE_LIMIT_RPM,
    ENV_SWEEP_INTERVAL_SECS,
};

#[derive(Parser)]
#[command(name = "opencortex")]
#[command(version, about = "Agent message broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Maximum message payload size in bytes
    #[arg(long, global = true, env = ENV_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: Option<usize>,

    /// Default claim lease in seconds
    #[arg(long, global = true, env = ENV_DEFAULT_LEASE_SECS)]
    pub default_lease_secs: Option<u64>,

    /// Maximum claim lease in seconds
    #[arg(long, global = true, env = ENV_MAX_LEASE_SECS)]
    pub max_lease_secs: Option<u64>,

    /// Lease attempts before a delivery is dead-lettered
    #[arg(long, global = true, env = ENV_MAX_ATTEMPTS)]
    pub max_attempts: Option<u32>,

    /// Sweeper tick interval in seconds
    #[arg(long, global = true, env = ENV_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: Option<u64>,

    /// Enable or disable per-identity rate limiting
    #[arg(long, global = true, env = ENV_RATE_LIMIT_ENABLED)]
    pub rate_limit: Option<bool>,

    /// Rate limit requests per minute
    #[arg(long, global = true, env = ENV_RATE_LIMIT_RPM)]
    pub rate_limit_rpm: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server (default when no command is given)
    Start,
}

/// CLI values relevant to configuration loading
#[derive(Debug, Default, Clone)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub max_payload_bytes: Option<usize>,
    pub default_lease_secs: Option<u64>,
    pub max_lease_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub sweep_interval_secs: Option<u64>,
    pub rate_limit: Option<bool>,
    pub rate_limit_rpm: Option<u32>,
}

/// Parse CLI arguments into config overrides plus the requested command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        max_payload_bytes: cli.max_payload_bytes,
        default_lease_secs: cli.default_lease_secs,
        max_lease_secs: cli.max_lease_secs,
        max_attempts: cli.max_attempts,
        sweep_interval_secs: cli.sweep_interval_secs,
        rate_limit: cli.rate_limit,
        rate_limit_rpm: cli.rate_limit_rpm,
    };
    (config, cli.command)
}
