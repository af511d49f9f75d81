//! FissionDB Partition Engine Daemon
//!
//! `fissiond` runs one partition engine as a standalone process, driven by
//! a coordinating host over a framed TCP connection:
//!
//! ```bash
//! # Listen on the default port
//! fissiond
//!
//! # Listen on a custom port
//! fissiond --port 21215
//! ```
//!
//! The daemon accepts a single connection and serves commands on it until
//! the host disconnects or sends `Terminate`.

use std::net::TcpListener;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fission_engine::EngineConfig;
use fission_ipc::EngineService;

/// FissionDB partition engine daemon.
#[derive(Parser, Debug)]
#[command(
    name = "fissiond",
    version,
    about = "FissionDB partition engine daemon",
    long_about = "Runs one FissionDB partition engine, driven by a \
                  coordinating host over a framed TCP connection."
)]
struct Args {
    /// Host address to bind to.
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "FISSION_HOST")]
    host: String,

    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 21214, env = "FISSION_PORT")]
    port: u16,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "FISSION_LOG_LEVEL")]
    log_level: String,

    /// Result buffer capacity in bytes.
    #[arg(long, env = "FISSION_RESULT_BUFFER_BYTES")]
    result_buffer_bytes: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = EngineConfig::default();
    if let Some(bytes) = args.result_buffer_bytes {
        config = config.with_result_buffer_capacity(bytes);
    }

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address)
        .with_context(|| format!("failed to bind {address}"))?;
    info!("listening on {address}");

    let (stream, peer) = listener.accept().context("failed to accept connection")?;
    stream
        .set_nodelay(true)
        .context("failed to set TCP_NODELAY")?;
    info!("host connected from {peer}");

    let mut service = EngineService::with_config(stream, config);
    service.run().context("command loop failed")?;

    info!("engine stopped");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_new(format!(
        "fission_ipc={level},fission_engine={level},fission_storage={level}",
        level = args.log_level
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
