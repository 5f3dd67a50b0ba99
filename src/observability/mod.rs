//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle and adapters produce:
//!     → logging.rs (structured log events, console + optional file)
//!     → metrics.rs (start/stop failure counters, run duration)
//!
//! Consumers:
//!     → stdout / log file
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap and no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
