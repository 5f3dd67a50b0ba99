//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML or JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → each adapter is built from its own section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - Typed sections with direct field access; no string-path lookups
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::LifecycleConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::PostgresConfig;
pub use schema::RedisConfig;
pub use schema::ServerConfig;
