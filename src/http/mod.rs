//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (listener owned by the HttpServer adapter)
//!     → router.rs (request id, timeout, trace layers → handlers)
//!     → Send to client
//! ```

pub mod router;
pub mod server;

pub use router::build_router;
pub use server::HttpServer;
