//! Server configuration.
//!
//! Values start from built-in defaults, are overridden by environment
//! variables, and finally by command-line flags (applied in `main`).
//!
//! # Environment Variables
//!
//! - `MURMUR_HOST`: Listen interface. Default: `0.0.0.0`
//! - `MURMUR_PORT`: Listen port. Default: `7777`
//! - `MURMUR_BACKLOG`: Accept backlog. Default: `50`
//! - `MURMUR_MAX_LINE_LENGTH`: Longest accepted client line in bytes. Default: `4096`
//! - `MURMUR_OUTBOUND_BUFFER`: Queued lines per connection before it is reaped. Default: `256`
//! - `MURMUR_DRAIN_TIMEOUT_SECS`: Shutdown drain timeout. Default: `5`
//! - `MURMUR_LOG_FORMAT`: `pretty`, `compact` or `json`. Default: `pretty`

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::ChatError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// Single-line human readable output
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ChatError::config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Accept backlog passed to `listen(2)`
    pub backlog: u32,
    /// Longest client line accepted, in bytes
    pub max_line_length: usize,
    /// Outbound queue capacity per connection
    pub outbound_buffer: usize,
    /// How long shutdown waits for connection tasks to finish
    pub drain_timeout: Duration,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            backlog: 50,
            max_line_length: 4096,
            outbound_buffer: 256,
            drain_timeout: Duration::from_secs(5),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("MURMUR_HOST")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.host);

        Self {
            host,
            port: parse_or(&lookup, "MURMUR_PORT", defaults.port),
            backlog: parse_or(&lookup, "MURMUR_BACKLOG", defaults.backlog),
            max_line_length: parse_or(&lookup, "MURMUR_MAX_LINE_LENGTH", defaults.max_line_length),
            outbound_buffer: parse_or(&lookup, "MURMUR_OUTBOUND_BUFFER", defaults.outbound_buffer),
            drain_timeout: lookup("MURMUR_DRAIN_TIMEOUT_SECS")
                .and_then(|v| parse_logged("MURMUR_DRAIN_TIMEOUT_SECS", &v))
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_timeout),
            log_format: parse_or(&lookup, "MURMUR_LOG_FORMAT", defaults.log_format),
        }
    }

    /// Resolve `host:port` into a socket address.
    pub async fn bind_addr(&self) -> Result<SocketAddr, ChatError> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| ChatError::config(format!("host '{}' did not resolve", self.host)))
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!(
            host = %self.host,
            port = self.port,
            backlog = self.backlog,
            "Listen configuration"
        );
        info!(
            max_line_length = self.max_line_length,
            outbound_buffer = self.outbound_buffer,
            drain_timeout_secs = self.drain_timeout.as_secs(),
            log_format = %self.log_format,
            "Connection limits"
        );
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| parse_logged(key, &value))
        .unwrap_or(default)
}

fn parse_logged<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "Ignoring invalid configuration value");
            None
        }
    }
}
