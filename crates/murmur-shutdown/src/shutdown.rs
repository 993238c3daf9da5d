//! Graceful shutdown coordinator.
//!
//! Uses a `CancellationToken` to stop the accept loop and to close every
//! connection derived from it, and `ConnectionGuard`s to track drain.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal indicating why shutdown was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Tracks one live connection task for drain coordination.
///
/// The coordinator considers drain complete once every guard has dropped.
#[derive(Clone)]
pub struct ConnectionGuard {
    _drop_notifier: Arc<DropNotifier>,
}

struct DropNotifier {
    counter: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for DropNotifier {
    fn drop(&mut self) {
        let prev = self.counter.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Coordinator for graceful shutdown with connection draining.
pub struct GracefulShutdown {
    /// Cancelled when the server should stop accepting and close connections.
    stop_accepting: CancellationToken,

    /// Active connection counter.
    connection_count: Arc<AtomicUsize>,

    /// Notified when the last connection drains.
    drain_notify: Arc<Notify>,

    /// Drain timeout.
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new shutdown coordinator.
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            stop_accepting: CancellationToken::new(),
            connection_count: Arc::new(AtomicUsize::new(0)),
            drain_notify: Arc::new(Notify::new()),
            drain_timeout,
        }
    }

    /// Get a `CancellationToken` that fires when the server should stop.
    ///
    /// Per-connection tokens are created as children of this one, so
    /// cancelling it also closes every open connection.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Create a `ConnectionGuard` for a new connection.
    ///
    /// Increments the counter on creation, decrements on drop.
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            _drop_notifier: Arc::new(DropNotifier {
                counter: Arc::clone(&self.connection_count),
                notify: Arc::clone(&self.drain_notify),
            }),
        }
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// The configured drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Wait for a shutdown signal.
    #[cfg(unix)]
    pub async fn wait_for_signal(&self) -> io::Result<ShutdownSignal> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let received = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                ShutdownSignal::Interrupt
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                ShutdownSignal::Terminate
            }
        };
        Ok(received)
    }

    /// Wait for a shutdown signal.
    #[cfg(not(unix))]
    pub async fn wait_for_signal(&self) -> io::Result<ShutdownSignal> {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, initiating graceful shutdown");
        Ok(ShutdownSignal::Interrupt)
    }

    /// Wait for a shutdown signal, then cancel the stop token.
    pub async fn listen(&self) -> io::Result<ShutdownSignal> {
        let signal = self.wait_for_signal().await?;
        info!("Stopping accept loop");
        self.stop_accepting.cancel();
        Ok(signal)
    }

    /// Trigger the stop phase programmatically.
    pub fn trigger_stop(&self) {
        self.stop_accepting.cancel();
    }

    /// Run the drain phase: wait for all connections to complete or timeout.
    ///
    /// Returns `true` if all connections drained, `false` if timed out.
    pub async fn drain(&self) -> bool {
        let active = self.active_connections();
        if active == 0 {
            info!("No active connections, drain complete");
            return true;
        }

        info!(
            active_connections = active,
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Draining active connections"
        );

        tokio::select! {
            _ = self.wait_for_drain() => {
                info!("All connections drained cleanly");
                true
            }
            _ = tokio::time::sleep(self.drain_timeout) => {
                warn!(
                    remaining_connections = self.active_connections(),
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Drain timeout expired"
                );
                false
            }
        }
    }

    async fn wait_for_drain(&self) {
        loop {
            // Must exist before the counter check to observe notify_waiters.
            let notified = self.drain_notify.notified();
            if self.connection_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
