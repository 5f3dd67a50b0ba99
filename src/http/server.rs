//! HTTP server adapter.
//!
//! # Responsibilities
//! - Bind the listener during start (bind errors fail start)
//! - Serve the router in a background task
//! - Drain in-flight requests on stop, bounded by the graceful timeout
//!
//! # Design Decisions
//! - `start` holds the `running` slot from bind until the server is stored,
//!   so a concurrent `stop` always sees the listener it has to close
//! - A start whose context finished while binding releases the listener

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument as _, Span};

use crate::config::ServerConfig;
use crate::http::router::build_router;
use crate::lifecycle::{Adapter, AdapterError, Context};

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP listener managed as an adapter.
pub struct HttpServer {
    host: String,
    port: u16,
    graceful_timeout: Duration,
    router: Router,
    span: Span,
    running: Mutex<Option<Running>>,
}

impl HttpServer {
    /// Create a server for the given configuration with the default routes.
    ///
    /// Lifecycle events and the serve loop are recorded in `span`.
    pub fn new(config: &ServerConfig, span: Span) -> Self {
        Self::with_router(config, build_router(config.request_timeout()), span)
    }

    /// Create a server that serves `router`.
    pub fn with_router(config: &ServerConfig, router: Router, span: Span) -> Self {
        Self {
            host: config.app_host.clone(),
            port: config.app_port,
            graceful_timeout: config.graceful_shutdown(),
            router,
            span,
            running: Mutex::new(None),
        }
    }

    /// Address the listener is bound to while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|running| running.addr)
    }

    fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn serve(&self, ctx: &Context) -> Result<(), AdapterError> {
        let address = self.bind_address();
        let mut running = self.running.lock().await;
        info!(address = %address, "Starting HTTP server.");

        let listener = ctx
            .guard(TcpListener::bind(&address))
            .await
            .map_err(|reason| AdapterError::interrupted("http bind", reason))??;
        if let Some(reason) = ctx.err() {
            warn!(%reason, "Start cancelled after bind, releasing listener.");
            return Err(AdapterError::interrupted("http bind", reason));
        }
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = self.router.clone().into_make_service_with_connect_info::<SocketAddr>();
        let task = tokio::spawn(
            async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { signal.cancelled().await })
                    .await;
                if let Err(error) = &result {
                    error!(%error, "HTTP server terminated with error.");
                }
                result
            }
            .instrument(self.span.clone()),
        );

        info!(address = %addr, "HTTP server listening.");
        *running = Some(Running { addr, shutdown, task });
        Ok(())
    }

    async fn drain(&self, ctx: &Context) -> Result<(), AdapterError> {
        let Some(Running { shutdown, task, .. }) = self.running.lock().await.take() else {
            return Ok(());
        };

        shutdown.cancel();
        let drain = ctx.child_with_timeout(self.graceful_timeout);
        match drain.guard(task).await {
            Ok(Ok(Ok(()))) => {
                warn!(server = "HTTP", "HTTP server stopped gracefully.");
                Ok(())
            }
            Ok(Ok(Err(error))) => {
                error!(%error, "Error shutting down HTTP server.");
                Err(AdapterError::Io(error))
            }
            Ok(Err(join_error)) => Err(AdapterError::msg(format!("HTTP server task failed: {}", join_error))),
            Err(reason) => {
                error!(%reason, "HTTP server did not drain in time.");
                Err(AdapterError::interrupted("http shutdown", reason))
            }
        }
    }
}

#[async_trait]
impl Adapter for HttpServer {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.serve(ctx).instrument(self.span.clone()).await
    }

    async fn stop(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.drain(ctx).instrument(self.span.clone()).await
    }
}
