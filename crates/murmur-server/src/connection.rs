//! Connection actor for handling individual chat clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use murmur_proto::{ClientCommand, ErrorCode, ServerMessage, Username};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::codec::{ClientLine, ClientLineCodec};
use crate::config::ServerConfig;
use crate::metrics;
use crate::registry::{ConnectionHandle, SendOutcome};
use crate::router::{join_text, Delivery, Router};
use crate::types::{ConnectionId, ConnectionState};
use crate::ChatError;

/// How long the writer waits for the socket to shut down after closing.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Longest accepted client line, in bytes
    pub max_line_length: usize,
    /// Outbound queue capacity
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_line_length: config.max_line_length,
            outbound_buffer: config.outbound_buffer,
        }
    }
}

/// Actor managing a single chat client connection.
///
/// The actor is the only reader of its stream. Writes go through the
/// connection's outbound queue to a dedicated writer task.
pub struct ConnectionActor<S> {
    /// Inbound lines
    lines: FramedRead<ReadHalf<S>, ClientLineCodec>,
    /// Handle onto this connection's outbound queue
    handle: ConnectionHandle,
    /// Shared router
    router: Router,
    /// Current connection state
    state: ConnectionState,
    /// Registered name (after a successful registration)
    username: Option<Username>,
}

impl<S> ConnectionActor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Handle a new incoming connection until it terminates.
    ///
    /// `close` is cancelled when the connection ends for any reason;
    /// cancelling it from outside (reaping, server shutdown) ends the
    /// connection.
    #[instrument(
        name = "murmur.connection.handle",
        skip_all,
        fields(peer = %peer, conn_id = %id, username = tracing::field::Empty)
    )]
    pub async fn handle_connection(
        stream: S,
        peer: SocketAddr,
        id: ConnectionId,
        router: Router,
        settings: ConnectionSettings,
        close: CancellationToken,
    ) -> Result<(), ChatError> {
        debug!("New connection");

        let (read_half, write_half) = tokio::io::split(stream);
        let (handle, outbound) =
            ConnectionHandle::channel(id, peer, settings.outbound_buffer, close.clone());

        let writer = tokio::spawn(write_loop(write_half, outbound, close).in_current_span());

        let mut actor = Self {
            lines: FramedRead::new(read_half, ClientLineCodec::new(settings.max_line_length)),
            handle,
            router,
            state: ConnectionState::AwaitingName,
            username: None,
        };

        actor.run().await;
        actor.terminate();

        writer
            .await
            .map_err(|e| ChatError::internal(format!("writer task failed: {e}")))?;

        debug!("Connection closed");
        Ok(())
    }

    /// Main connection loop.
    async fn run(&mut self) {
        let Some(name) = self.negotiate_name().await else {
            return;
        };

        self.state = ConnectionState::Active;
        self.process_lines(&name).await;
    }

    /// Prompt for a username and register it.
    async fn negotiate_name(&mut self) -> Option<Username> {
        self.state = ConnectionState::AwaitingName;
        self.send(ServerMessage::enter_name());

        let Some(line) = self.next_line().await else {
            debug!("Disconnected before choosing a name");
            return None;
        };

        let name = match Username::parse(&line) {
            Ok(name) => name,
            Err(e) => {
                debug!("Rejected empty username");
                metrics::record_registration("empty");
                self.send(ServerMessage::error(ErrorCode::EmptyName, e.to_string()));
                return None;
            }
        };

        let registry = self.router.registry();
        if let Err(e) = registry.register(name.clone(), self.handle.clone()) {
            info!(error = %e, "Rejected duplicate username");
            metrics::record_registration("duplicate");
            self.send(ServerMessage::error(ErrorCode::DuplicateName, "Username taken"));
            return None;
        }

        self.username = Some(name.clone());
        tracing::Span::current().record("username", name.as_str());
        metrics::record_registration("ok");
        metrics::record_active_users(registry.len());
        info!(username = %name, "User joined");

        self.send(ServerMessage::welcome(&name));
        self.router.broadcast_system(&join_text(&name));
        Some(name)
    }

    /// Process client lines until the client quits or the connection closes.
    async fn process_lines(&mut self, name: &Username) {
        while let Some(line) = self.next_line().await {
            let command = match ClientCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "Malformed client line");
                    let code = e.error_code().unwrap_or(ErrorCode::MalformedPrivate);
                    self.send(ServerMessage::error(code, e.to_string()));
                    continue;
                }
            };

            match command {
                ClientCommand::Quit => {
                    debug!("Client quit");
                    break;
                }
                ClientCommand::List => {
                    let names = self.router.list_usernames();
                    self.send(ServerMessage::users(names));
                }
                ClientCommand::Private { to, text } => {
                    match self.router.deliver_private(name, &to, &text) {
                        Delivery::Delivered => self.send(ServerMessage::sent_private(&to, text)),
                        Delivery::NotFound => self.send(ServerMessage::error(
                            ErrorCode::NoUser,
                            format!("User '{to}' not found"),
                        )),
                    }
                }
                ClientCommand::Broadcast(text) => self.router.broadcast_message(name, &text),
            }
        }
    }

    /// Read the next line, skipping over-long and undecodable ones.
    ///
    /// Returns `None` on end of stream, read errors, or when the connection
    /// is closed from outside.
    async fn next_line(&mut self) -> Option<String> {
        let close = self.handle.close_token().clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = close.cancelled() => {
                    debug!(state = %self.state, "Connection closed while reading");
                    return None;
                }
                next = self.lines.next() => next,
            };

            match next {
                Some(Ok(ClientLine::Line(line))) => return Some(line),
                Some(Ok(ClientLine::TooLong)) => {
                    warn!("Client line exceeds maximum length, skipping");
                }
                Some(Ok(ClientLine::Invalid)) => {
                    warn!("Client line is not valid UTF-8, skipping");
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Read failed, treating as disconnect");
                    return None;
                }
                None => return None,
            }
        }
    }

    /// Enqueue a line to this client. A connection that cannot take its own
    /// replies is closed.
    fn send(&self, message: ServerMessage) {
        if let SendOutcome::Failed(failure) = self.router.send_to(&self.handle, message) {
            debug!(?failure, "Own connection unusable, closing");
            self.handle.close();
        }
    }

    /// Release the username and close the connection.
    fn terminate(&mut self) {
        self.state = ConnectionState::Terminated;
        match self.username.take() {
            Some(name) => {
                self.router.depart(&name, &self.handle);
            }
            None => self.handle.close(),
        }
    }
}

/// Drain the outbound queue onto the socket until the connection closes.
///
/// Lines queued before the close are still written. A write that cannot make
/// progress is abandoned once the connection is closed.
async fn write_loop<W>(writer: W, mut outbound: mpsc::Receiver<ServerMessage>, close: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = close.cancelled() => break,
        };

        tokio::select! {
            biased;
            result = sink.send(message.to_string()) => {
                if let Err(e) = result {
                    debug!(error = %e, "Write failed, closing connection");
                    break;
                }
            }
            _ = close.cancelled() => {
                debug!("Dropped pending write on close");
                break;
            }
        }
    }

    close.cancel();
    match tokio::time::timeout(CLOSE_GRACE, SinkExt::<String>::close(&mut sink)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Socket shutdown failed"),
        Err(_) => debug!("Socket shutdown timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::task::JoinHandle;
    use tokio_util::codec::Framed;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct TestClient {
        framed: Framed<DuplexStream, LinesCodec>,
        close: CancellationToken,
        task: JoinHandle<Result<(), ChatError>>,
    }

    impl TestClient {
        fn connect(router: &Router, settings: ConnectionSettings) -> Self {
            let (client, server) = tokio::io::duplex(64 * 1024);
            Self::spawn(client, server, router, settings)
        }

        /// Connect through a server-side stream whose writes start failing
        /// once the returned flag is set.
        fn connect_breakable(router: &Router) -> (Self, Arc<AtomicBool>) {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let broken = Arc::new(AtomicBool::new(false));
            let server = BreakableStream {
                inner: server,
                broken: Arc::clone(&broken),
            };
            let client = Self::spawn(client, server, router, ConnectionSettings::default());
            (client, broken)
        }

        fn spawn<S>(client: DuplexStream, server: S, router: &Router, settings: ConnectionSettings) -> Self
        where
            S: AsyncRead + AsyncWrite + Send + 'static,
        {
            let close = CancellationToken::new();
            let task = tokio::spawn(ConnectionActor::handle_connection(
                server,
                "127.0.0.1:55555".parse().unwrap(),
                ConnectionId::next(),
                router.clone(),
                settings,
                close.clone(),
            ));
            Self {
                framed: Framed::new(client, LinesCodec::new()),
                close,
                task,
            }
        }

        async fn send(&mut self, line: &str) {
            self.framed.send(line.to_string()).await.unwrap();
        }

        async fn recv(&mut self) -> ServerMessage {
            let line = tokio::time::timeout(TIMEOUT, self.framed.next())
                .await
                .expect("timed out waiting for a line")
                .expect("stream ended")
                .unwrap();
            line.parse().unwrap()
        }

        async fn expect_closed(&mut self) {
            let next = tokio::time::timeout(TIMEOUT, self.framed.next())
                .await
                .expect("timed out waiting for close");
            assert!(next.is_none(), "expected end of stream, got {next:?}");
        }

        async fn join(router: &Router, name: &str) -> Self {
            Self::connect(router, ConnectionSettings::default()).register(name).await
        }

        async fn register(mut self, name: &str) -> Self {
            assert!(matches!(self.recv().await, ServerMessage::EnterName { .. }));
            self.send(name).await;
            assert!(matches!(self.recv().await, ServerMessage::Ok { .. }));
            assert!(matches!(self.recv().await, ServerMessage::System { .. }));
            self
        }

        async fn assert_silent(&mut self) {
            let next = tokio::time::timeout(Duration::from_millis(200), self.framed.next()).await;
            assert!(next.is_err(), "expected no further lines, got {next:?}");
        }
    }

    /// Duplex stream whose writes fail with `BrokenPipe` once `broken` is set.
    struct BreakableStream {
        inner: DuplexStream,
        broken: Arc<AtomicBool>,
    }

    impl BreakableStream {
        fn check(&self) -> io::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            Ok(())
        }
    }

    impl AsyncRead for BreakableStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BreakableStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.check()?;
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.check()?;
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    fn router() -> Router {
        Router::new(Arc::new(Registry::new()))
    }

    #[tokio::test]
    async fn test_prompt_and_welcome() {
        let router = router();
        let mut client = TestClient::connect(&router, ConnectionSettings::default());

        assert_eq!(client.recv().await, ServerMessage::enter_name());
        client.send("  alice  ").await;
        assert_eq!(client.recv().await, ServerMessage::welcome("alice"));

        match client.recv().await {
            ServerMessage::System { text, .. } => assert_eq!(text, "alice has joined the chat."),
            other => panic!("expected join notice, got {other:?}"),
        }
        assert!(router.registry().contains("alice"));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let router = router();
        let mut client = TestClient::connect(&router, ConnectionSettings::default());

        client.recv().await;
        client.send("   ").await;

        assert_eq!(
            client.recv().await,
            ServerMessage::error(ErrorCode::EmptyName, "Username cannot be empty")
        );
        client.expect_closed().await;
        client.task.await.unwrap().unwrap();
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let router = router();
        let _alice = TestClient::join(&router, "alice").await;
        let mut second = TestClient::connect(&router, ConnectionSettings::default());

        second.recv().await;
        second.send("alice").await;

        assert_eq!(
            second.recv().await,
            ServerMessage::error(ErrorCode::DuplicateName, "Username taken")
        );
        second.expect_closed().await;
        assert_eq!(router.list_usernames().len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_private_errors() {
        let router = router();
        let mut alice = TestClient::join(&router, "alice").await;

        alice.send("/list").await;
        assert_eq!(alice.recv().await, ServerMessage::users(["alice"]));

        alice.send("@ hello").await;
        assert_eq!(
            alice.recv().await,
            ServerMessage::error(ErrorCode::MalformedPrivate, "Usage: @username message")
        );

        alice.send("@carol hello").await;
        assert_eq!(
            alice.recv().await,
            ServerMessage::error(ErrorCode::NoUser, "User 'carol' not found")
        );
    }

    #[tokio::test]
    async fn test_quit_releases_name() {
        let router = router();
        let mut alice = TestClient::join(&router, "alice").await;

        alice.send("").await;
        alice.send("/quit").await;
        alice.expect_closed().await;
        alice.task.await.unwrap().unwrap();

        assert!(!router.registry().contains("alice"));
        let _again = TestClient::join(&router, "alice").await;
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let router = router();
        let settings = ConnectionSettings {
            max_line_length: 16,
            outbound_buffer: 8,
        };
        let mut client = TestClient::connect(&router, settings);
        client.recv().await;
        client.send("alice").await;
        client.recv().await;
        client.recv().await;

        client.send(&"x".repeat(64)).await;
        client.send("/list").await;

        assert_eq!(client.recv().await, ServerMessage::users(["alice"]));
    }

    #[tokio::test]
    async fn test_external_close_ends_connection() {
        let router = router();
        let mut alice = TestClient::join(&router, "alice").await;

        alice.close.cancel();

        alice.expect_closed().await;
        alice.task.await.unwrap().unwrap();
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let router = router();
        let mut alice = TestClient::join(&router, "alice").await;

        alice.framed.get_mut().write_all(b"\xff\xfe\n").await.unwrap();
        alice.send("/list").await;

        assert_eq!(alice.recv().await, ServerMessage::users(["alice"]));
        assert!(router.registry().contains("alice"));
    }

    #[tokio::test]
    async fn test_write_failure_departs_once() {
        let router = router();
        let (alice, broken) = TestClient::connect_breakable(&router);
        let mut alice = alice.register("alice").await;
        let mut bob = TestClient::join(&router, "bob").await;

        match alice.recv().await {
            ServerMessage::System { text, .. } => assert_eq!(text, "bob has joined the chat."),
            other => panic!("expected join notice, got {other:?}"),
        }

        broken.store(true, Ordering::SeqCst);
        bob.send("hello").await;

        match bob.recv().await {
            ServerMessage::System { text, .. } => assert_eq!(text, "alice has left the chat."),
            other => panic!("expected departure notice, got {other:?}"),
        }
        tokio::time::timeout(TIMEOUT, alice.task)
            .await
            .expect("connection did not finish")
            .unwrap()
            .unwrap();

        assert_eq!(router.list_usernames(), vec![Username::parse("bob").unwrap()]);
        bob.assert_silent().await;
    }
}
