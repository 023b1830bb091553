//! SFTP gateway binary
//!
//! Configuration is layered: TOML file, then `SFTP_ROOT` / `SFTP_PORT`, then
//! command-line flags.
//!
//! Run with: cargo run --bin mock-server-sftp -- --root /srv/sftp

use anyhow::{Context, Result};
use clap::Parser;
use mock_server_sftp::{Config, LogFormat, Server};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root directory for SFTP operations (overrides SFTP_ROOT)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn build_config(args: Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    config.apply_env().context("reading environment overrides")?;

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(file) = args.log_file {
        config.logging.file = Some(file);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    Ok(config)
}

/// Install the global subscriber. The returned guard must outlive `main` so
/// buffered file output is flushed.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("invalid log level {:?}", config.logging.level))?;

    let Some(log_file) = &config.logging.file else {
        match config.logging.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(true)
                .with_span_list(true)
                .init(),
            LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        }
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    let file_name = log_file
        .file_name()
        .with_context(|| format!("log file {} has no file name", log_file.display()))?;

    std::fs::create_dir_all(&directory)
        .with_context(|| format!("creating log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(&directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init(),
    }

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = build_config(Args::parse())?;
    let _log_guard = init_logging(&config)?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = %config.root_dir.display(),
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        "Starting mock SFTP gateway"
    );

    let server = Server::new(config).await.inspect_err(|e| {
        error!(event = "server_creation_failed", error = %e, "Failed to create server");
    })?;

    server.run().await.inspect_err(|e| {
        error!(event = "server_error", error = %e, "Server stopped");
    })?;

    info!(event = "server_shutdown", "SFTP gateway shutdown complete");
    Ok(())
}
