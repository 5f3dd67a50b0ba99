//! OS signal handling.
//!
//! SIGINT and SIGTERM both request a graceful shutdown. On platforms without
//! unix signals only Ctrl-C is observed.

use std::fmt;
use std::io;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};

/// A termination request delivered by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Registered signal listeners.
///
/// Registration happens eagerly so that a failure to install handlers is
/// reported before any adapter starts.
pub struct Signals {
    #[cfg(unix)]
    interrupt: UnixSignal,
    #[cfg(unix)]
    terminate: UnixSignal,
}

impl Signals {
    /// Install the interrupt and terminate handlers.
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Signal::Interrupt,
            Some(()) = self.terminate.recv() => Signal::Terminate,
            else => std::future::pending().await,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Signal {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl-C.");
            return std::future::pending().await;
        }
        Signal::Interrupt
    }
}
