//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Json(serde_json::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Toml(e) => write!(f, "Parse error: {}", e),
            ConfigError::Json(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Toml(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Source format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` selects JSON, anything else TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Parse configuration text without validating it.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<AppConfig, ConfigError> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(ConfigError::Toml),
        ConfigFormat::Json => serde_json::from_str(content).map_err(ConfigError::Json),
    }
}

/// Load and validate configuration from a TOML or JSON file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config = parse_config(&content, ConfigFormat::from_path(path))?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
