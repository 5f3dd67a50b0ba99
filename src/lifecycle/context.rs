//! Execution context handed to adapters.
//!
//! A [`Context`] combines a cancellation token with an optional deadline. The
//! root context of a run is cancelled when shutdown is triggered; the shutdown
//! context carries only a deadline and has no cancellation ancestry, so
//! cancelling the root never shortens the shutdown window.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextDone {
    /// The context was cancelled explicitly.
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation-aware execution context.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that is done once `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A fresh context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a child context that expires after `timeout` or when this
    /// context is done, whichever comes first.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextDone> {
        if self.token.is_cancelled() {
            return Some(ContextDone::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextDone::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until the context is done.
    pub async fn done(&self) -> ContextDone {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextDone::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextDone::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextDone::Cancelled
            }
        }
    }

    /// Drive `fut` until it completes or the context is done.
    ///
    /// The future is always polled at least once before the context is
    /// checked, so work that completes immediately is never discarded. When
    /// the context wins, `fut` is dropped.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, ContextDone>
    where
        F: Future,
    {
        tokio::select! {
            biased;

            output = fut => Ok(output),
            reason = self.done() => Err(reason),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
