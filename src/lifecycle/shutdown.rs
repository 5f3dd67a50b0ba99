//! Shutdown coordination.
//!
//! [`ShutdownHandle`] lets any holder request a graceful shutdown of a running
//! [`AppServer`](super::AppServer). [`stop_all`] performs the stop sweep once
//! shutdown has begun.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::adapter::{Adapter, AdapterError};
use super::context::Context;
use crate::observability::metrics;

/// Cloneable trigger for the root context of a run.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Tally of one stop sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Adapters whose `stop` returned `Ok`.
    pub stopped: usize,
    /// Adapters whose `stop` returned an error.
    pub failed: usize,
    /// Adapters whose `stop` was abandoned at the shutdown deadline.
    pub timed_out: usize,
}

impl ShutdownReport {
    /// Total number of `stop` invocations.
    pub fn attempted(&self) -> usize {
        self.stopped + self.failed + self.timed_out
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

/// Stop every adapter, one at a time, in registration order.
///
/// Each call is bounded by `ctx`; a call still running at the deadline is
/// dropped and counted as timed out. Failures and panics are logged and never
/// abort the sweep.
pub async fn stop_all(adapters: &[Arc<dyn Adapter>], ctx: &Context) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    for (index, adapter) in adapters.iter().enumerate() {
        let name = adapter.name();
        debug!(adapter = name, index, remaining = ?ctx.remaining(), "Stopping adapter.");

        let stop = AssertUnwindSafe(adapter.stop(ctx)).catch_unwind();
        match ctx.guard(stop).await {
            Ok(Ok(Ok(()))) => {
                report.stopped += 1;
                debug!(adapter = name, index, "Adapter stopped.");
            }
            Ok(Ok(Err(error))) => {
                report.failed += 1;
                metrics::record_stop_failure(name, "error");
                error!(adapter = name, index, %error, "Adapter stop failed.");
            }
            Ok(Err(panic)) => {
                report.failed += 1;
                metrics::record_stop_failure(name, "panic");
                let error = AdapterError::from_panic(panic.as_ref());
                error!(adapter = name, index, %error, "Adapter stop panicked.");
            }
            Err(reason) => {
                report.timed_out += 1;
                metrics::record_stop_failure(name, "deadline");
                error!(adapter = name, index, %reason, "Adapter stop abandoned at shutdown deadline.");
            }
        }
    }

    report
}
