use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_server::{telemetry, ChatServer, LogFormat, ServerConfig};
use murmur_shutdown::GracefulShutdown;
use tracing::{error, info};

/// Murmur chat server
#[derive(Parser, Debug)]
#[command(name = "murmur-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Interface to listen on [env: MURMUR_HOST] [default: 0.0.0.0]
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on [env: MURMUR_PORT] [default: 7777]
    #[arg(short, long)]
    port: Option<u16>,

    /// Accept backlog [env: MURMUR_BACKLOG] [default: 50]
    #[arg(long)]
    backlog: Option<u32>,

    /// Longest accepted client line in bytes [env: MURMUR_MAX_LINE_LENGTH]
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Queued lines per connection before it is dropped [env: MURMUR_OUTBOUND_BUFFER]
    #[arg(long)]
    outbound_buffer: Option<usize>,

    /// Seconds to wait for connections on shutdown [env: MURMUR_DRAIN_TIMEOUT_SECS]
    #[arg(long)]
    drain_timeout_secs: Option<u64>,

    /// Log output format [env: MURMUR_LOG_FORMAT]
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Override environment configuration with command-line flags.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(max_line_length) = self.max_line_length {
            config.max_line_length = max_line_length;
        }
        if let Some(outbound_buffer) = self.outbound_buffer {
            config.outbound_buffer = outbound_buffer;
        }
        if let Some(secs) = self.drain_timeout_secs {
            config.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.apply(ServerConfig::from_env());

    telemetry::init(config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Murmur Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.log_config();

    let server = ChatServer::bind(&config)
        .await
        .with_context(|| format!("Failed to start listener on {}:{}", config.host, config.port))?;

    let shutdown = Arc::new(GracefulShutdown::new(config.drain_timeout));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            match shutdown.listen().await {
                Ok(signal) => info!(?signal, "Shutdown requested"),
                Err(e) => error!(error = %e, "Failed to install signal handlers"),
            }
        });
    }

    server.run(&shutdown).await.context("Chat server failed")?;

    telemetry::shutdown();
    Ok(())
}
