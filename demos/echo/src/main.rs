//! tcpzap Echo Demo
//!
//! Runs an echo server, a client, or both in one process.
//!
//! - `--mode server`: serve until Ctrl-C
//! - `--mode client`: send `--message` to `--addr` and print the response
//! - `--mode demo` (default): start a server on `--addr`, send one message,
//!   log the response and its metrics, then shut down
//!
//! Transport settings come from the `TCPZAP_*` environment variables; log
//! filtering from `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tcpzap::client::Client;
use tcpzap::core::{BoxError, Config, Metrics, reporter};
use tcpzap::server::{Handler, Server};
use tcpzap::transport::Context;
use tracing_subscriber::EnvFilter;

const ECHO_PREFIX: &[u8] = b"Echo: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Server and client in one process.
    Demo,
    /// Echo server only.
    Server,
    /// Client only.
    Client,
}

/// tcpzap echo server and client.
#[derive(Parser, Debug)]
#[command(name = "tcpzap-echo", about = "tcpzap echo demo")]
struct Cli {
    /// What to run.
    #[arg(long, value_enum, default_value_t = Mode::Demo)]
    mode: Mode,

    /// Address to listen on or dial.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Message sent by the client.
    #[arg(long, default_value = "Hello")]
    message: String,
}

/// Prefixes every message with `"Echo: "`.
struct EchoHandler;

impl Handler for EchoHandler {
    async fn handle(&self, _ctx: &Context, msg: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        let mut resp = Vec::with_capacity(ECHO_PREFIX.len() + msg.len());
        resp.extend_from_slice(ECHO_PREFIX);
        resp.extend_from_slice(&msg);
        Ok(resp)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("reading TCPZAP_* environment")?;
    tracing::info!(mode = ?cli.mode, addr = %cli.addr, ?config, "tcpzap-echo starting");

    match cli.mode {
        Mode::Server => run_server(&cli.addr, config).await,
        Mode::Client => run_client(&cli.addr, &cli.message, config).await,
        Mode::Demo => run_demo(&cli.addr, &cli.message, config).await,
    }
}

async fn run_server(addr: &str, config: Config) -> anyhow::Result<()> {
    let server = Arc::new(Server::bind(addr, config).await?);

    let closer = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            if let Err(e) = closer.close() {
                tracing::warn!(error = %e, "server close failed");
            }
        }
    });

    server.serve(&Context::background(), EchoHandler).await?;
    Ok(())
}

async fn run_client(addr: &str, message: &str, config: Config) -> anyhow::Result<()> {
    let config = Config {
        reporter: Some(reporter(log_metrics)),
        ..config
    };
    let client = Client::connect(addr, config).await?;
    let resp = client.send(&Context::background(), message.as_bytes()).await?;
    println!("{}", String::from_utf8_lossy(&resp));
    client.close().await?;
    Ok(())
}

async fn run_demo(addr: &str, message: &str, config: Config) -> anyhow::Result<()> {
    let server = Arc::new(Server::bind(addr, config.clone()).await?);
    let local = server.local_addr().to_string();

    let background = server.clone();
    let serving = tokio::spawn(async move {
        background
            .serve(&Context::background(), EchoHandler)
            .await
    });

    let outcome = run_client(&local, message, config).await;

    server.close()?;
    serving.await.context("server task panicked")??;
    outcome
}

fn log_metrics(m: Metrics) {
    tracing::info!(
        target_addr = %m.target,
        latency = ?m.latency,
        success = m.success,
        "request metrics"
    );
}
