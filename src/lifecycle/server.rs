//! The application server: owns the adapters and runs their lifecycle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument as _, Span};

use super::adapter::{Adapter, AdapterError};
use super::context::Context;
use super::shutdown::{stop_all, ShutdownHandle};
use super::signals::{Signal, Signals};
use super::startup::StartPhase;
use crate::observability::metrics;

/// Name used when none (or an empty one) is configured.
pub const DEFAULT_NAME: &str = "default-server";

/// Version used when none (or an empty one) is configured.
pub const DEFAULT_VERSION: &str = "0.0.1";

/// Window granted to the stop sweep.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal error of a run.
#[derive(Debug, Error)]
pub enum ServerError {
    /// An adapter could not start. Only the first failure is reported.
    #[error("adapter start failed: {source}")]
    AdapterStart {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] std::io::Error),
}

/// Lifecycle state of an [`AppServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting_down",
            ServerState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// What ended the running phase.
enum Trigger {
    StartFailure,
    Signal(Signal),
    Cancelled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::StartFailure => f.write_str("start_failure"),
            Trigger::Signal(signal) => write!(f, "signal:{signal}"),
            Trigger::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Builder for [`AppServer`].
#[derive(Default)]
pub struct AppServerBuilder {
    name: String,
    version: String,
    adapters: Vec<Arc<dyn Adapter>>,
    shutdown_timeout: Option<Duration>,
    error_capacity: Option<usize>,
    span: Option<Span>,
}

impl AppServerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Register an adapter the server takes ownership of.
    pub fn adapter<A>(self, adapter: A) -> Self
    where
        A: Adapter + 'static,
    {
        self.shared_adapter(Arc::new(adapter))
    }

    /// Register an adapter the caller keeps a handle to.
    pub fn shared_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Append several adapters. Repeated calls accumulate.
    pub fn adapters<I>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Adapter>>,
    {
        self.adapters.extend(adapters);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Capacity of the start-failure channel. Defaults to the adapter count.
    pub fn error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = Some(capacity);
        self
    }

    /// Span every lifecycle event is recorded in.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> AppServer {
        let name = if self.name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            self.name
        };
        let version = if self.version.is_empty() {
            DEFAULT_VERSION.to_string()
        } else {
            self.version
        };
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("app_server", server = %name, version = %version));
        let error_capacity = self.error_capacity.unwrap_or(self.adapters.len());
        let (state, _) = watch::channel(ServerState::Idle);

        AppServer {
            name,
            version,
            adapters: self.adapters,
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            error_capacity,
            span,
            root: CancellationToken::new(),
            state,
        }
    }
}

/// Runs a set of adapters until the first start failure, a termination
/// signal, or an explicit shutdown request, then stops them all.
pub struct AppServer {
    name: String,
    version: String,
    adapters: Vec<Arc<dyn Adapter>>,
    shutdown_timeout: Duration,
    error_capacity: usize,
    span: Span,
    root: CancellationToken,
    state: watch::Sender<ServerState>,
}

impl AppServer {
    pub fn builder() -> AppServerBuilder {
        AppServerBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Handle that cancels the root context, ending the run without error.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.root.clone())
    }

    /// Observe lifecycle state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Run until SIGINT/SIGTERM, a start failure, or a shutdown request.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut signals = Signals::register().map_err(ServerError::SignalHandler)?;
        self.run_until(async move { signals.recv().await }).await
    }

    /// Run with `signal` standing in for the OS signal source.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = Signal> + Send,
    {
        let span = self.span.clone();
        self.run_inner(signal).instrument(span).await
    }

    async fn run_inner<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = Signal> + Send,
    {
        let started_at = Instant::now();

        info!(
            name = %self.name,
            version = %self.version,
            adapters = self.adapters.len(),
            "Starting server."
        );
        self.state.send_replace(ServerState::Starting);

        let root = Context::with_token(self.root.clone());
        let mut start = StartPhase::spawn(&self.adapters, &root, self.error_capacity);
        self.state.send_replace(ServerState::Running);

        tokio::pin!(signal);
        let mut outcome = Ok(());

        let trigger = tokio::select! {
            Some(failure) = start.next_failure() => {
                error!(
                    adapter = %failure.adapter,
                    index = failure.index,
                    error = %failure.error,
                    "Adapter start failed, initiating shutdown."
                );
                outcome = Err(ServerError::AdapterStart {
                    adapter: failure.adapter,
                    source: failure.error,
                });
                self.root.cancel();
                Trigger::StartFailure
            }
            received = &mut signal => {
                warn!(signal = %received, "Received signal, shutting down.");
                self.root.cancel();
                Trigger::Signal(received)
            }
            _ = self.root.cancelled() => {
                warn!("Context cancelled, shutting down.");
                Trigger::Cancelled
            }
        };

        self.state.send_replace(ServerState::ShuttingDown);
        info!(
            trigger = %trigger,
            timeout_secs = self.shutdown_timeout.as_secs_f64(),
            "Shutdown initiated."
        );

        let shutdown_ctx = Context::with_timeout(self.shutdown_timeout);
        let report = stop_all(&self.adapters, &shutdown_ctx).await;

        let pending_starts = start.pending();
        if pending_starts > 0 {
            info!(pending = pending_starts, "Waiting for adapter start tasks to finish.");
        }
        let joined = start.join().await;
        for late in &joined.late_failures {
            warn!(
                adapter = %late.adapter,
                index = late.index,
                error = %late.error,
                "Additional adapter start failure after shutdown began."
            );
        }
        self.state.send_replace(ServerState::Stopped);

        let elapsed = started_at.elapsed();
        metrics::record_run_duration(elapsed.as_secs_f64());

        warn!(
            server = %self.name,
            shutdown_time_sec = elapsed.as_secs_f64(),
            stopped = report.stopped,
            stop_failed = report.failed,
            stop_timed_out = report.timed_out,
            dropped_start_failures = joined.dropped,
            "Shutdown complete."
        );
        warn!(
            alive_tasks = tokio::runtime::Handle::current().metrics().num_alive_tasks(),
            "Final runtime stats."
        );

        outcome
    }
}

impl fmt::Debug for AppServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("adapters", &self.adapters.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}
