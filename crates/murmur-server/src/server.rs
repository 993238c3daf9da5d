//! Chat server listener.
//!
//! Binds the listening socket, accepts connections and spawns one
//! [`ConnectionActor`] per client. The registry lives here and is shared
//! with every connection through the [`Router`].

use std::net::SocketAddr;
use std::sync::Arc;

use murmur_shutdown::GracefulShutdown;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::connection::{ConnectionActor, ConnectionSettings};
use crate::metrics;
use crate::registry::Registry;
use crate::router::Router;
use crate::types::ConnectionId;
use crate::ChatError;

/// Chat server bound to a listening socket.
pub struct ChatServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    settings: ConnectionSettings,
}

impl ChatServer {
    /// Bind the listening socket described by `config`, with `SO_REUSEADDR`
    /// and the configured backlog.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ChatError> {
        let addr = config.bind_addr().await?;
        let listener = listen(addr, config.backlog).map_err(|source| ChatError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, backlog = config.backlog, "Chat server listening");

        Ok(Self {
            listener,
            local_addr,
            router: Router::new(Arc::new(Registry::new())),
            settings: ConnectionSettings::from(config),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }

    /// The router used by every connection.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accept connections until the shutdown coordinator's stop token fires,
    /// then close every connection and wait for them to drain.
    pub async fn run(self, shutdown: &GracefulShutdown) -> Result<(), ChatError> {
        let stop = shutdown.stop_token();

        loop {
            let (stream, peer) = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, peer = %peer, "Failed to set TCP_NODELAY");
            }

            let guard = shutdown.connection_guard();
            let id = ConnectionId::next();
            let close = stop.child_token();
            let router = self.router.clone();
            let settings = self.settings;

            tokio::spawn(
                async move {
                    let _guard = guard;
                    if let Err(e) =
                        ConnectionActor::handle_connection(stream, peer, id, router, settings, close)
                            .await
                    {
                        warn!(error = %e, "Connection error");
                    }
                }
                .instrument(info_span!(
                    "murmur.connection",
                    peer = %peer,
                    conn_id = %id,
                )),
            );
        }

        info!("Accept loop stopped");
        drop(self.listener);

        let remaining = self.router.registry().drain();
        for (name, handle) in &remaining {
            debug!(username = %name, conn_id = %handle.id(), "Closing connection");
            handle.close();
        }
        metrics::record_active_users(0);
        info!(closed = remaining.len(), "Closed registered connections");

        shutdown.drain().await;
        Ok(())
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
