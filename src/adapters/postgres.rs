//! PostgreSQL connection adapter.
//!
//! # Responsibilities
//! - Open one client connection and drive it in the background
//! - Verify the connection with a round trip before reporting started
//! - Close the connection on stop
//!
//! # Design Decisions
//! - Missing host/user/dbname disables the adapter instead of failing start
//! - Connect or ping errors fail start
//! - `sslmode = true` requires TLS but does not verify the server certificate,
//!   the same guarantee as libpq's `sslmode=require`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::Client;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info, warn, Instrument as _, Span};

use crate::config::PostgresConfig;
use crate::lifecycle::{Adapter, AdapterError, Context};

struct Connection {
    client: Client,
    driver: JoinHandle<()>,
}

/// Adapter owning a single PostgreSQL client.
pub struct PostgresAdapter {
    config: PostgresConfig,
    span: Span,
    connection: Mutex<Option<Connection>>,
}

impl PostgresAdapter {
    pub fn new(config: PostgresConfig, span: Span) -> Self {
        Self {
            config,
            span,
            connection: Mutex::new(None),
        }
    }

    /// Whether `start` established a connection that has not been closed.
    pub async fn is_connected(&self) -> bool {
        match self.connection.lock().await.as_ref() {
            Some(connection) => !connection.client.is_closed(),
            None => false,
        }
    }

    fn is_complete(&self) -> bool {
        !self.config.host.is_empty() && !self.config.user.is_empty() && !self.config.dbname.is_empty()
    }

    fn client_config(&self) -> tokio_postgres::Config {
        let ssl_mode = if self.config.sslmode {
            SslMode::Require
        } else {
            SslMode::Disable
        };

        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .password(&self.config.password)
            .dbname(&self.config.dbname)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .ssl_mode(ssl_mode);
        pg
    }

    async fn connect(&self, ctx: &Context) -> Result<(), AdapterError> {
        if !self.is_complete() {
            error!("Incomplete database configuration, postgres adapter disabled.");
            return Ok(());
        }

        // With `SslMode::Disable` the connector is never used.
        let tls = tls_connector()?;
        let (client, connection) = ctx
            .guard(self.client_config().connect(tls))
            .await
            .map_err(|reason| AdapterError::interrupted("postgres connect", reason))?
            .map_err(|e| AdapterError::backend("postgres", e))?;

        let driver = tokio::spawn(
            async move {
                if let Err(error) = connection.await {
                    error!(%error, "Postgres connection terminated with error.");
                }
            }
            .instrument(self.span.clone()),
        );

        let ping = ctx
            .guard(client.simple_query("SELECT 1"))
            .await
            .map_err(|reason| AdapterError::interrupted("postgres ping", reason))
            .and_then(|result| result.map_err(|e| AdapterError::backend("postgres", e)));
        if let Err(error) = ping {
            error!(%error, "Failed to ping database.");
            drop(client);
            driver.abort();
            return Err(error);
        }

        let mut slot = self.connection.lock().await;
        if let Some(reason) = ctx.err() {
            warn!(%reason, "Start cancelled after connect, closing connection.");
            drop(client);
            driver.abort();
            return Err(AdapterError::interrupted("postgres connect", reason));
        }
        *slot = Some(Connection { client, driver });

        info!(
            host = %self.config.host,
            port = self.config.port,
            db = %self.config.dbname,
            tls = self.config.sslmode,
            "Connected to database."
        );
        Ok(())
    }

    async fn close(&self, ctx: &Context) -> Result<(), AdapterError> {
        let Some(Connection { client, driver }) = self.connection.lock().await.take() else {
            return Ok(());
        };

        // Dropping the last client handle ends the connection driver.
        drop(client);
        match ctx.guard(driver).await {
            Ok(Ok(())) => {
                warn!("Database connection closed.");
                Ok(())
            }
            Ok(Err(e)) => Err(AdapterError::msg(format!("failed to close connection: {}", e))),
            Err(reason) => Err(AdapterError::interrupted("postgres close", reason)),
        }
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn start(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.connect(ctx).instrument(self.span.clone()).await
    }

    async fn stop(&self, ctx: &Context) -> Result<(), AdapterError> {
        self.close(ctx).instrument(self.span.clone()).await
    }
}

fn tls_connector() -> Result<MakeRustlsConnect, AdapterError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = EncryptOnly {
        algorithms: provider.signature_verification_algorithms,
    };

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| AdapterError::backend("postgres tls", e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct EncryptOnly {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for EncryptOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
