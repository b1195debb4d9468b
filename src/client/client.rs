//! Request/response client.
//!
//! A [`Client`] owns one [`Connection`] to a server. Every
//! [`send`](Client::send) writes the request, then waits for the response,
//! resending the request when a receive attempt fails transiently.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::core::{Config, ConfigError, Tracker};
use crate::transport::{Connection, Context, ContextError, TransportError};

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dialing the server failed.
    #[error("dial {addr} failed: {source}")]
    Dial {
        /// Server address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Dialing the server did not finish in time.
    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout {
        /// Server address.
        addr: String,
        /// Configured dial timeout.
        timeout: Duration,
    },

    /// Writing the request failed.
    #[error("send to {target} failed: {source}")]
    Send {
        /// Server identifier.
        target: String,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// Reading the response failed with a permanent error.
    #[error("receive from {target} failed: {source}")]
    Receive {
        /// Server identifier.
        target: String,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// Every receive attempt failed.
    #[error("{target}: no response after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Server identifier.
        target: String,
        /// Receive attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: TransportError,
    },

    /// Shutting down the connection failed.
    #[error("close {target} failed: {source}")]
    Close {
        /// Server identifier.
        target: String,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The caller's context was cancelled or expired.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A client bound to one server connection.
///
/// # Example
///
/// ```no_run
/// use tcpzap::client::Client;
/// use tcpzap::core::Config;
/// use tcpzap::transport::Context;
///
/// # async fn run() -> Result<(), tcpzap::client::ClientError> {
/// let client = Client::connect("127.0.0.1:8080", Config::default()).await?;
/// let resp = client.send(&Context::background(), b"Hello").await?;
/// println!("{}", String::from_utf8_lossy(&resp));
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    conn: Connection<S>,
    target: String,
    config: Config,
}

impl Client<TcpStream> {
    /// Dial `addr`, giving up after `config.timeout`.
    pub async fn connect(addr: &str, config: Config) -> Result<Self, ClientError> {
        config.validate()?;

        let stream = match tokio::time::timeout(config.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Dial {
                    addr: addr.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(ClientError::DialTimeout {
                    addr: addr.to_string(),
                    timeout: config.timeout,
                });
            }
        };
        stream.set_nodelay(true)?;

        info!(addr, "connected");
        Self::from_stream(stream, addr, config)
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Use an already established stream. `target` identifies the peer in
    /// errors and reported metrics.
    pub fn from_stream(
        stream: S,
        target: impl Into<String>,
        config: Config,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            conn: Connection::with_config(stream, &config),
            target: target.into(),
            config,
        })
    }

    /// Send a request and wait for its response.
    ///
    /// Each write and each receive attempt is bounded by `config.timeout`,
    /// so the call returns even when the window never reopens. A transient
    /// receive failure leads to a `retry_delay` pause and a resend of the
    /// request, up to `config.retries` times. The configured reporter is
    /// called exactly once with the outcome.
    pub async fn send(&self, ctx: &Context, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let tracker = Tracker::start(self.target.as_str(), self.config.reporter.clone());
        let result = self.round_trip(ctx, payload).await;
        match &result {
            Ok(resp) => debug!(server = %self.target, len = resp.len(), elapsed = ?tracker.elapsed(), "response received"),
            Err(e) => warn!(server = %self.target, error = %e, "request failed"),
        }
        tracker.report(result.is_ok());
        result
    }

    async fn round_trip(&self, ctx: &Context, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.write(ctx, payload).await?;

        let attempts = self.config.retries + 1;
        let mut attempt = 1;
        loop {
            let attempt_ctx = ctx.child_with_timeout(self.config.timeout);
            let err = match self.conn.receive(&attempt_ctx).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            if let Some(ctx_err) = ctx.err() {
                return Err(ctx_err.into());
            }
            if !err.is_transient() {
                return Err(ClientError::Receive {
                    target: self.target.clone(),
                    source: err,
                });
            }
            if attempt >= attempts {
                return Err(ClientError::RetriesExhausted {
                    target: self.target.clone(),
                    attempts,
                    source: err,
                });
            }

            warn!(server = %self.target, attempt, attempts, error = %err, "receive failed, resending");
            attempt += 1;
            ctx.sleep(self.config.retry_delay).await?;
            self.write(ctx, payload).await?;
        }
    }

    /// Write one request, waiting at most `config.timeout` for a window slot
    /// and the write itself.
    async fn write(&self, ctx: &Context, payload: &[u8]) -> Result<(), ClientError> {
        let write_ctx = ctx.child_with_timeout(self.config.timeout);
        self.conn
            .send(&write_ctx, payload)
            .await
            .map_err(|source| match (&source, ctx.err()) {
                (TransportError::Context(_), Some(e)) => ClientError::Context(e),
                _ => ClientError::Send {
                    target: self.target.clone(),
                    source,
                },
            })
    }

    /// Shut down the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn
            .close()
            .await
            .map_err(|source| ClientError::Close {
                target: self.target.clone(),
                source,
            })
    }
}

impl<S> Client<S> {
    /// Identifier of the server.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current smoothed round-trip time of the connection.
    pub fn rtt(&self) -> Duration {
        self.conn.rtt()
    }

    /// The client configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }
}
