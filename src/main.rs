//! CryptoNote Mining Client - Main Application
//!
//! Solo mining client for CryptoNote daemons.

use cryptonote_mining_client::{
    client::{DaemonClient, RpcDaemonClient},
    config::{Config, LogFormat, LogLevel},
    monitor::DaemonChainMonitor,
    utils::format_hash_rate,
    worker::WorkerFactory,
    Error, MiningOrchestrator, Result, Termination, APP_NAME, APP_VERSION,
};

use std::process::ExitCode;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", APP_NAME, e);
            return ExitCode::from(e.exit_code());
        }
    };

    init_logging(config.log_level, config.log_format);

    if config.print_config {
        return match print_configuration(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to print configuration: {}", e);
                ExitCode::from(e.exit_code())
            }
        };
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), "Miner failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: worker={}, threads={}, daemon={}",
        config.worker,
        config.threads,
        config.daemon_url()
    );

    let mining_config = config.mining_config()?;
    let daemon: Arc<dyn DaemonClient> = Arc::new(RpcDaemonClient::new(
        config.daemon_url(),
        config.http_timeout_duration(),
    )?);
    let monitor = Arc::new(DaemonChainMonitor::new(
        Arc::clone(&daemon),
        mining_config.scan_period,
    ));
    let worker = WorkerFactory::create(config.worker, config.constant_delay_duration());

    let mut orchestrator =
        MiningOrchestrator::new(mining_config, daemon, Arc::clone(&worker), monitor);

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Couldn't listen for interrupt signal: {}", e),
        }
    });

    let summary = orchestrator.run().await?;

    let stats = worker.stats();
    info!(
        "Mined {} blocks ({} hashes, {})",
        summary.blocks_mined,
        stats.total_hashes,
        format_hash_rate(stats.average_hash_rate)
    );
    if summary.termination == Termination::Shutdown {
        info!("Stopped by user");
    }

    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(level: LogLevel, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level.into()).into())
        .from_env_lossy();

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Plain => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false))
                .init();
        }
    }
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config).map_err(Error::from)?;
    println!("{}", config_yaml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_printing() {
        let config = Config::try_parse_from([
            "cryptonote-mining-client",
            "--address",
            "addr",
            "--worker",
            "constant-delay",
        ])
        .unwrap();

        assert!(print_configuration(&config).is_ok());
    }
}
