//! Wiring from configuration to a ready-to-run [`AppServer`].

use tracing::info_span;

use crate::adapters::{PostgresAdapter, RedisAdapter};
use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::server::{DEFAULT_NAME, DEFAULT_VERSION};
use crate::lifecycle::AppServer;

/// Build the server with the database, cache and HTTP adapters, registered
/// in that order. Stops run in the same order.
///
/// Every adapter records its events in a child of the server span.
pub fn build_server(config: &AppConfig) -> AppServer {
    let name = non_empty(&config.server.app_name, DEFAULT_NAME);
    let version = non_empty(&config.server.app_version, DEFAULT_VERSION);
    let span = info_span!(
        "app_server",
        server = %name,
        version = %version,
        environment = %config.server.app_environment
    );

    AppServer::builder()
        .name(name)
        .version(version)
        .shutdown_timeout(config.lifecycle.shutdown_timeout())
        .span(span.clone())
        .adapter(PostgresAdapter::new(
            config.postgres.clone(),
            info_span!(parent: &span, "postgres"),
        ))
        .adapter(RedisAdapter::new(config.redis.clone(), info_span!(parent: &span, "redis")))
        .adapter(HttpServer::new(&config.server, info_span!(parent: &span, "http")))
        .build()
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn server_reflects_config() {
        let mut config = AppConfig::default();
        config.server.app_name = "kaffein".into();
        config.lifecycle.shutdown_timeout_secs = 3;

        let server = build_server(&config);
        assert_eq!(server.name(), "kaffein");
        assert_eq!(server.version(), "0.0.1");
        assert_eq!(server.adapter_count(), 3);
        assert_eq!(server.shutdown_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn empty_name_falls_back_to_default() {
        let server = build_server(&AppConfig::default());
        assert_eq!(server.name(), DEFAULT_NAME);
    }
}
