//! Start phase: concurrent fan-out of `Adapter::start`.
//!
//! # Responsibilities
//! - Spawn one task per adapter, all sharing the root context
//! - Report start failures on a bounded channel
//! - Never block a failing adapter: when the channel is full the failure is
//!   dropped and logged
//!
//! # Design Decisions
//! - Only the first failure decides the run outcome, so buffering beyond the
//!   channel capacity is pointless
//! - A panic inside `start` is reported like any other start failure

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt as _;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument as _};

use super::adapter::{Adapter, AdapterError};
use super::context::Context;
use crate::observability::metrics;

/// A failed `start` call.
#[derive(Debug)]
pub struct StartFailure {
    /// Registration index of the adapter.
    pub index: usize,
    /// Adapter label.
    pub adapter: String,
    pub error: AdapterError,
}

/// Handles to the running start tasks.
pub struct StartPhase {
    tasks: JoinSet<()>,
    failures: mpsc::Receiver<StartFailure>,
    dropped: Arc<AtomicUsize>,
}

impl StartPhase {
    /// Spawn `start(ctx)` for every adapter.
    ///
    /// `capacity` bounds the error channel; zero is raised to one.
    pub fn spawn(adapters: &[Arc<dyn Adapter>], ctx: &Context, capacity: usize) -> Self {
        let (failures_tx, failures) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (index, adapter) in adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let ctx = ctx.clone();
            let failures_tx = failures_tx.clone();
            let dropped = Arc::clone(&dropped);
            let span = tracing::info_span!("adapter_start", adapter = adapter.name(), index);

            tasks.spawn(
                async move {
                    let result = AssertUnwindSafe(adapter.start(&ctx))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(AdapterError::from_panic(panic.as_ref())));

                    let error = match result {
                        Ok(()) => {
                            debug!("Adapter started.");
                            return;
                        }
                        Err(error) => error,
                    };

                    let name = adapter.name().to_string();
                    debug!(%error, "Adapter start returned an error.");
                    metrics::record_start_failure(&name);

                    let failure = StartFailure {
                        index,
                        adapter: name,
                        error,
                    };
                    match failures_tx.try_send(failure) {
                        Ok(()) => {}
                        Err(TrySendError::Full(failure)) => {
                            dropped.fetch_add(1, Ordering::Relaxed);
                            metrics::record_dropped_start_failure(&failure.adapter);
                            warn!(error = %failure.error, "Error channel full, dropping error.");
                        }
                        Err(TrySendError::Closed(failure)) => {
                            dropped.fetch_add(1, Ordering::Relaxed);
                            metrics::record_dropped_start_failure(&failure.adapter);
                            warn!(error = %failure.error, "Error channel closed, dropping error.");
                        }
                    }
                }
                .instrument(span),
            );
        }

        Self {
            tasks,
            failures,
            dropped,
        }
    }

    /// Wait for the next reported start failure.
    ///
    /// Returns `None` once every start task has finished and all failures
    /// have been consumed.
    pub async fn next_failure(&mut self) -> Option<StartFailure> {
        self.failures.recv().await
    }

    /// Number of start tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Join every start task, then close the failure channel.
    ///
    /// Failures still buffered in the channel are returned so the caller can
    /// log them; they never change the run outcome.
    pub async fn join(mut self) -> JoinSummary {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(error) = joined {
                // Panics are caught inside the task, so this is an abort.
                error!(%error, "Adapter start task did not complete.");
            }
        }

        self.failures.close();
        let mut late_failures = Vec::new();
        while let Ok(failure) = self.failures.try_recv() {
            late_failures.push(failure);
        }

        JoinSummary {
            late_failures,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Result of joining the start phase.
#[derive(Debug)]
pub struct JoinSummary {
    /// Failures that were buffered but never consumed by the race.
    pub late_failures: Vec<StartFailure>,
    /// Failures dropped at send time.
    pub dropped: usize,
}
