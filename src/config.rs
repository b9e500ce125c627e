//! Configuration management for the CryptoNote mining client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Values given on the command line or in
//! the environment win over the file; the file wins over built-in defaults.

use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Worker types supported by the mining client
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// Multi-threaded CPU mining
    Cpu,
    /// Constant delay mining for test chains
    ConstantDelay,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Cpu => write!(f, "cpu"),
            WorkerKind::ConstantDelay => write!(f, "constant-delay"),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Complete configuration for the mining client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "cryptonote-mining-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "CryptoNote solo mining client",
    long_about = "Mines blocks against a CryptoNote daemon, restarting work whenever the chain advances"
)]
#[serde(default)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Daemon host
    #[arg(long, env = "MINER_DAEMON_HOST", default_value = "127.0.0.1")]
    pub daemon_host: String,

    /// Daemon RPC port
    #[arg(long, env = "MINER_DAEMON_PORT", default_value = "8081")]
    pub daemon_port: u16,

    /// Wallet address receiving the block rewards
    #[arg(short = 'a', long, env = "MINER_ADDRESS")]
    pub address: Option<String>,

    /// Chain head polling period in seconds
    #[arg(long, env = "MINER_SCAN_TIME", default_value = "30")]
    pub scan_time: u64,

    /// Number of mining threads (0 = all cores)
    #[arg(short = 't', long, env = "MINER_THREADS", default_value = "1")]
    pub threads: usize,

    /// Stop after this many blocks (0 = unlimited)
    #[arg(long, env = "MINER_LIMIT", default_value = "0")]
    pub limit: u64,

    /// Timestamp of the first mined block (0 = use the daemon's)
    #[arg(long, env = "MINER_FIRST_BLOCK_TIMESTAMP", default_value = "0")]
    pub first_block_timestamp: u64,

    /// Seconds between timestamps of consecutive mined blocks (0 = use the daemon's)
    #[arg(long, env = "MINER_BLOCK_TIMESTAMP_INTERVAL", default_value = "0")]
    pub block_timestamp_interval: u64,

    /// Mining worker type
    #[arg(short = 'w', long, env = "MINER_WORKER", default_value = "cpu")]
    pub worker: WorkerKind,

    /// Constant delay block time in seconds
    #[arg(long, default_value = "30")]
    pub constant_delay_block_time: u64,

    /// HTTP timeout for daemon requests in milliseconds
    #[arg(long, default_value = "30000")]
    pub http_timeout: u64,

    /// Log level
    #[arg(short = 'l', long, env = "MINER_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_config: false,
            config_file: None,
            daemon_host: "127.0.0.1".to_string(),
            daemon_port: 8081,
            address: None,
            scan_time: 30,
            threads: 1,
            limit: 0,
            first_block_timestamp: 0,
            block_timestamp_interval: 0,
            worker: WorkerKind::Cpu,
            constant_delay_block_time: 30,
            http_timeout: 30_000,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}

impl Config {
    /// Parse the command line, merge the configuration file if any, and validate
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Build a configuration from parsed arguments
    pub async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, matches);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take file values for every option not set on the command line or in
    /// the environment
    fn merge_with_file(mut self, file: Self, matches: &ArgMatches) -> Self {
        let explicit = |id: &str| {
            matches!(
                matches.value_source(id),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            )
        };

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if !explicit(stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        merge!(
            daemon_host,
            daemon_port,
            address,
            scan_time,
            threads,
            limit,
            first_block_timestamp,
            block_timestamp_interval,
            worker,
            constant_delay_block_time,
            http_timeout,
            log_level,
            log_format,
        );

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match &self.address {
            Some(address) if !address.trim().is_empty() => {}
            _ => return Err(Error::config("Mining address is required (--address)")),
        }

        if self.scan_time == 0 {
            return Err(Error::config("Scan time must be greater than 0"));
        }

        if self.block_timestamp_interval != 0 && self.first_block_timestamp == 0 {
            warn!(
                "Block timestamp interval {}s is ignored without a first block timestamp",
                self.block_timestamp_interval
            );
        }

        if self.http_timeout == 0 {
            return Err(Error::config("HTTP timeout must be greater than 0"));
        }

        Url::parse(&self.daemon_url())
            .map_err(|e| Error::config(format!("Invalid daemon address: {}", e)))?;

        Ok(())
    }

    /// Base URL of the daemon RPC server
    pub fn daemon_url(&self) -> String {
        format!("http://{}:{}", self.daemon_host, self.daemon_port)
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }

    /// Get constant delay duration
    pub fn constant_delay_duration(&self) -> Duration {
        Duration::from_secs(self.constant_delay_block_time)
    }

    /// Settings the orchestrator runs with
    pub fn mining_config(&self) -> Result<MiningConfig> {
        let address = self
            .address
            .clone()
            .ok_or_else(|| Error::config("Mining address is required (--address)"))?;

        Ok(MiningConfig {
            daemon_host: self.daemon_host.clone(),
            daemon_port: self.daemon_port,
            address,
            scan_period: Duration::from_secs(self.scan_time),
            thread_count: self.threads,
            blocks_limit: self.limit,
            first_block_timestamp: self.first_block_timestamp,
            block_timestamp_interval: self.block_timestamp_interval,
        })
    }
}

/// Immutable settings of one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningConfig {
    pub daemon_host: String,
    pub daemon_port: u16,
    /// Payout address passed to `getblocktemplate`
    pub address: String,
    /// Chain head polling period, also the startup retry delay
    pub scan_period: Duration,
    pub thread_count: usize,
    /// 0 = unlimited
    pub blocks_limit: u64,
    /// 0 = keep the daemon's timestamps
    pub first_block_timestamp: u64,
    /// 0 = keep the daemon's timestamps after the first block
    pub block_timestamp_interval: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            daemon_host: "127.0.0.1".to_string(),
            daemon_port: 8081,
            address: String::new(),
            scan_period: Duration::from_secs(30),
            thread_count: 1,
            blocks_limit: 0,
            first_block_timestamp: 0,
            block_timestamp_interval: 0,
        }
    }
}
