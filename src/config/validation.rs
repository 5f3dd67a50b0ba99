//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Incomplete backend settings are not errors here: the adapters log them
//!   and run disabled

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.lifecycle.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "lifecycle.shutdown_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.server.graceful_shutdown_secs == 0 {
        errors.push(ValidationError::new(
            "server.graceful_shutdown_secs",
            "must be greater than zero",
        ));
    }

    if config.postgres.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "postgres.connect_timeout_secs",
            "must be greater than zero",
        ));
    }

    if let Err(e) = EnvFilter::try_new(&config.observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter: {}", e),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
