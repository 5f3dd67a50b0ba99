//! Service bootstrap binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file ──▶ AppConfig ──┬──▶ PostgresAdapter ─┐
//!                               ├──▶ RedisAdapter ────┼──▶ AppServer::run()
//!                               └──▶ HttpServer ──────┘        │
//!                                                              ▼
//!                      start all concurrently ─▶ race(first failure, SIGINT/SIGTERM)
//!                                                              │
//!                      stop all in order (10s deadline) ◀──────┘
//! ```
//!
//! Exit status is 0 after a signal-triggered shutdown and 1 when an adapter
//! failed to start.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use kaffein::config::{load_config, AppConfig};
use kaffein::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "kaffein")]
#[command(about = "Starts the configured services and supervises their lifecycle", long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("configuration OK: {}", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    log_config(&config);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(error) = metrics::init_metrics(addr) {
                    tracing::error!(%error, "Metrics exporter disabled.");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = kaffein::build_server(&config);
    match server.run().await {
        Ok(()) => {
            tracing::info!("Server exited gracefully.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "Server exited with error.");
            ExitCode::FAILURE
        }
    }
}

fn log_config(config: &AppConfig) {
    tracing::info!(
        environment = %config.server.app_environment,
        http = %format!("{}:{}", config.server.app_host, config.server.app_port),
        postgres_host = %config.postgres.host,
        redis_host = %config.redis.host,
        shutdown_timeout_secs = config.lifecycle.shutdown_timeout_secs,
        "Configuration loaded"
    );
}
