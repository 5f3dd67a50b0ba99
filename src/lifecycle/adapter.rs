//! The contract every managed service implements.

use std::any::Any;
use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;

use super::context::{Context, ContextDone};

/// Boxed error type used to carry backend client errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors returned by an adapter's `start` or `stop`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Free-form failure.
    #[error("{0}")]
    Message(String),

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend client reported an error.
    #[error("{backend}: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    /// The operation gave up because its context finished first.
    #[error("{operation} interrupted: {reason}")]
    Interrupted {
        operation: &'static str,
        reason: ContextDone,
    },

    /// The adapter panicked.
    #[error("adapter panicked: {0}")]
    Panicked(String),
}

impl AdapterError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn backend<E>(backend: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend {
            backend,
            source: source.into(),
        }
    }

    pub fn interrupted(operation: &'static str, reason: ContextDone) -> Self {
        Self::Interrupted { operation, reason }
    }

    /// Convert a caught panic payload into [`AdapterError::Panicked`].
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// A long-lived service managed by the [`AppServer`](super::AppServer).
///
/// `start` establishes the service and returns once it is serving; it may
/// leave background work running. Observing cancellation of the start context
/// is the adapter's responsibility. `stop` releases resources and is called
/// exactly once per run, even when `start` failed, in which case it must be a
/// no-op.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn start(&self, ctx: &Context) -> Result<(), AdapterError>;

    async fn stop(&self, ctx: &Context) -> Result<(), AdapterError>;
}
