//! Service bootstrap library.
//!
//! Owns a set of long-lived services (database, cache, HTTP listener),
//! starts them concurrently and shuts them all down on the first start
//! failure or termination signal.

pub mod adapters;
pub mod bootstrap;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use bootstrap::build_server;
pub use config::AppConfig;
pub use lifecycle::{Adapter, AdapterError, AppServer, Context, ServerError, ShutdownHandle};
