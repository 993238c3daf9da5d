//! Logging setup for the murmur server binary.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and one fmt
//! layer in the configured [`LogFormat`]. No metrics exporter is set up here:
//! see [`crate::metrics`] for wiring a `MeterProvider` from the host.
//!
//! # Configuration
//!
//! - `RUST_LOG`: Log filter (default: `info,murmur_server=debug`)
//! - `MURMUR_LOG_FORMAT` / `--log-format`: `pretty`, `compact` or `json`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,murmur_server=debug";

/// Initialize logging.
///
/// Fails if a global subscriber is already installed.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .with_current_span(true),
            )
            .try_init()?,
    }

    tracing::info!(format = %format, "Telemetry initialized");
    Ok(())
}

/// Shutdown telemetry.
///
/// Call this before exit so the final log lines are emitted.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
