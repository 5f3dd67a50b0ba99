//! Redis connection adapter.
//!
//! A cache is optional for serving: when Redis cannot be reached the adapter
//! logs the failure and runs disabled instead of failing start.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument as _, Span};
use url::Url;

use crate::config::RedisConfig;
use crate::lifecycle::{Adapter, AdapterError, Context};

/// Adapter owning a multiplexed Redis connection.
pub struct RedisAdapter {
    config: RedisConfig,
    span: Span,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisAdapter {
    pub fn new(config: RedisConfig, span: Span) -> Self {
        Self {
            config,
            span,
            connection: Mutex::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// `redis://[:password@]host:port/db`
    pub fn connection_url(&self) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&format!(
            "redis://{}:{}/{}",
            self.config.host, self.config.port, self.config.db
        ))
        .map_err(|e| AdapterError::backend("redis", e))?;

        if !self.config.password.is_empty() {
            url.set_password(Some(&self.config.password))
                .map_err(|()| AdapterError::msg("redis: password cannot be set on this URL"))?;
        }
        Ok(url)
    }

    async fn connect(&self, ctx: &Context) -> Result<(), AdapterError> {
        if self.config.host.is_empty() || self.config.port == 0 {
            error!("Incomplete redis configuration, redis adapter disabled.");
            return Ok(());
        }

        let url = self.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(|e| AdapterError::backend("redis", e))?;

        let connect = async {
            let mut connection = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut connection).await?;
            Ok::<_, redis::RedisError>(connection)
        };

        match ctx.guard(connect).await {
            Ok(Ok(connection)) => {
                let mut slot = self.connection.lock().await;
                if let Some(reason) = ctx.err() {
                    warn!(%reason, "Start cancelled after connect, closing redis connection.");
                    return Ok(());
                }
                *slot = Some(connection);
                info!(
                    db = self.config.db,
                    host = %self.config.host,
                    port = self.config.port,
                    "Connected to redis."
                );
            }
            Ok(Err(error)) => {
                error!(%error, "Failed to connect to redis, redis adapter disabled.");
            }
            Err(reason) => {
                error!(%reason, "Redis connection interrupted, redis adapter disabled.");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.connection.lock().await.take().is_some() {
            warn!("Redis connection closed.");
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    fn name(&self) -> &str {
        "redis"
    }

    async fn start(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.connect(ctx).instrument(self.span.clone()).await
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), AdapterError> {
        self.close().instrument(self.span.clone()).await
    }
}
