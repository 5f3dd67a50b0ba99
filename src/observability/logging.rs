//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at process start
//! - Honour `RUST_LOG` over the configured level
//! - Optionally mirror every event as JSON into a log file
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Components receive their span at construction instead of reaching for
//!   ambient state

use std::fs::OpenOptions;
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to open log file: {0}")]
    File(#[from] std::io::Error),

    #[error("logging already initialized: {0}")]
    Init(#[from] TryInitError),
}

/// Build the level filter, preferring `RUST_LOG` when it is set.
pub fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.log_level)?),
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = env_filter(config)?;

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().json().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
    }

    Ok(())
}
