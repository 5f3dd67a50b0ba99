//! Backend connection adapters.
//!
//! Each adapter reads its own section of the configuration and is handed to
//! the [`AppServer`](crate::lifecycle::AppServer) by value; there are no
//! process-wide instances.

pub mod postgres;
pub mod redis;

pub use self::postgres::PostgresAdapter;
pub use self::redis::RedisAdapter;
