//! Accept loop and per-connection workers.
//!
//! Every accepted connection gets its own task running
//!
//! ```text
//! Idle → Receiving → Handling → Sending → Idle → ...
//! ```
//!
//! until any step fails, which moves it to `Closed`. Worker failures are
//! logged and never reach the accept loop or other connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::handler::Handler;
use crate::core::{BoxError, Config, ConfigError};
use crate::transport::{Connection, Context, ContextError, TransportError};

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("listen on {addr} failed: {source}")]
    Listen {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Receiving a request failed.
    #[error("receive from {peer} failed: {source}")]
    Receive {
        /// Remote address.
        peer: SocketAddr,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// The handler rejected a request.
    #[error("handler failed for {peer}: {source}")]
    Handler {
        /// Remote address.
        peer: SocketAddr,
        /// Handler error.
        #[source]
        source: BoxError,
    },

    /// Sending a response failed.
    #[error("send to {peer} failed: {source}")]
    Send {
        /// Remote address.
        peer: SocketAddr,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The serve context was cancelled or expired.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// True when a worker stopped because its peer hung up between requests.
    pub fn is_peer_closed(&self) -> bool {
        matches!(
            self,
            ServerError::Receive {
                source: TransportError::Frame(e),
                ..
            } if e.is_peer_closed()
        )
    }
}

/// Lifecycle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between requests.
    Idle,
    /// Reading a request.
    Receiving,
    /// Running the handler.
    Handling,
    /// Writing the response.
    Sending,
    /// Finished; the connection is closed.
    Closed,
}

/// A framed request/response server over TCP.
///
/// # Example
///
/// ```no_run
/// use tcpzap::core::{BoxError, Config};
/// use tcpzap::server::{Server, handler_fn};
/// use tcpzap::transport::Context;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::bind("127.0.0.1:8080", Config::default()).await?;
/// let echo = handler_fn(|_ctx, msg: Vec<u8>| async move { Ok::<_, BoxError>(msg) });
/// server.serve(&Context::background(), echo).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    /// `None` once closed.
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    config: Config,
    shutdown: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind a listening socket.
    pub async fn bind(addr: &str, config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Listen {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        info!(addr = %local_addr, "server listening");
        Ok(Self {
            listener: Mutex::new(Some(Arc::new(listener))),
            local_addr,
            config,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn listener(&self) -> MutexGuard<'_, Option<Arc<TcpListener>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept connections until the server is closed or `ctx` ends.
    ///
    /// Returns `Ok(())` after [`close`](Self::close) and a context error when
    /// `ctx` is cancelled or expires. Accept errors are logged and the loop
    /// keeps going. Running workers are not affected by the loop ending; they
    /// stop with `ctx` or their connection.
    pub async fn serve<H: Handler>(&self, ctx: &Context, handler: H) -> Result<(), ServerError> {
        let Some(listener) = self.listener().clone() else {
            return Ok(());
        };
        let handler = Arc::new(handler);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = closed_signal(&mut shutdown) => {
                    info!(addr = %self.local_addr, "server closed");
                    return Ok(());
                }
                err = ctx.done() => {
                    info!(addr = %self.local_addr, error = %err, "serve context ended");
                    return Err(err.into());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_worker(stream, peer, ctx.clone(), handler.clone()),
                    Err(e) => {
                        if self.is_closed() {
                            return Ok(());
                        }
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    }

    fn spawn_worker<H: Handler>(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Context,
        handler: Arc<H>,
    ) {
        debug!(peer = %peer, "accepted connection");
        let conn = Connection::with_config(stream, &self.config);
        let active = ActiveGuard::enter(&self.active);

        tokio::spawn(async move {
            // Released on unwind too, so a panicking handler is not counted.
            let _active = active;
            match run_worker(&conn, peer, &ctx, handler.as_ref()).await {
                Err(e) if e.is_peer_closed() => debug!(peer = %peer, "connection closed by peer"),
                Err(e) => warn!(peer = %peer, error = %e, "connection failed"),
                Ok(()) => {}
            }
            if let Err(e) = conn.close().await {
                debug!(peer = %peer, error = %e, "connection shutdown failed");
            }
        });
    }

    /// Stop accepting connections and release the listening socket.
    ///
    /// A concurrent [`serve`](Self::serve) returns `Ok(())`. Idempotent.
    ///
    /// # Errors
    ///
    /// None at present: dropping the listener cannot fail, so this always
    /// returns `Ok(())`.
    pub fn close(&self) -> Result<(), ServerError> {
        let listener = self.listener().take();
        if listener.is_some() {
            self.shutdown.send_replace(true);
            debug!(addr = %self.local_addr, "close requested");
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.listener().is_none()
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connection workers currently running.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Counts a running worker until dropped.
#[derive(Debug)]
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn closed_signal(rx: &mut watch::Receiver<bool>) {
    // The sender lives in the server, which outlives every serve call.
    let _ = rx.wait_for(|closed| *closed).await;
}

async fn run_worker<H: Handler>(
    conn: &Connection<TcpStream>,
    peer: SocketAddr,
    ctx: &Context,
    handler: &H,
) -> Result<(), ServerError> {
    let mut state = WorkerState::Idle;
    let result = serve_requests(conn, peer, ctx, handler, &mut state).await;
    enter(&mut state, WorkerState::Closed, peer);
    result
}

async fn serve_requests<H: Handler>(
    conn: &Connection<TcpStream>,
    peer: SocketAddr,
    ctx: &Context,
    handler: &H,
    state: &mut WorkerState,
) -> Result<(), ServerError> {
    loop {
        enter(state, WorkerState::Receiving, peer);
        let msg = conn
            .receive(ctx)
            .await
            .map_err(|source| ServerError::Receive { peer, source })?;

        enter(state, WorkerState::Handling, peer);
        let resp = handler
            .handle(ctx, msg)
            .await
            .map_err(|source| ServerError::Handler { peer, source })?;

        enter(state, WorkerState::Sending, peer);
        conn.send(ctx, &resp)
            .await
            .map_err(|source| ServerError::Send { peer, source })?;

        enter(state, WorkerState::Idle, peer);
    }
}

fn enter(state: &mut WorkerState, next: WorkerState, peer: SocketAddr) {
    trace!(peer = %peer, from = ?*state, to = ?next, "worker state");
    *state = next;
}
