//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     AppServer::run → spawn Adapter::start per adapter (root context)
//!                    → failures → bounded channel (drop when full)
//!
//! Race (server.rs):
//!     first start failure | SIGINT/SIGTERM (signals.rs) | ShutdownHandle
//!     → cancel root context
//!
//! Shutdown (shutdown.rs):
//!     fresh context with deadline → Adapter::stop one by one, in order
//!     → join start tasks → report outcome
//! ```
//!
//! # States
//! ```text
//! Idle → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Design Decisions
//! - Starts run concurrently, stops run sequentially in registration order
//! - Only the first start failure becomes the run outcome
//! - Stop failures are logged, never returned
//! - The shutdown deadline is independent of the root context

pub mod adapter;
pub mod context;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use adapter::{Adapter, AdapterError};
pub use context::{Context, ContextDone};
pub use server::{AppServer, AppServerBuilder, ServerError, ServerState};
pub use shutdown::{ShutdownHandle, ShutdownReport};
pub use signals::Signal;
