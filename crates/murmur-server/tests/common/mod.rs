//! Test utilities for chat server integration tests.
//!
//! Provides a server bound to an ephemeral loopback port and a raw line
//! client that speaks the wire protocol directly.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use murmur_proto::{ServerMessage, Username};
use murmur_server::{ChatServer, Registry, ServerConfig};
use murmur_shutdown::GracefulShutdown;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client waits before concluding nothing more is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Test server handle. The server is stopped on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    shutdown: Arc<GracefulShutdown>,
    task: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a chat server on an available loopback port.
    pub async fn start() -> Self {
        Self::start_with_config(ServerConfig::default()).await
    }

    /// Start a chat server with custom limits. Host and port are overridden.
    pub async fn start_with_config(config: ServerConfig) -> Self {
        init_tracing();

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            drain_timeout: Duration::from_secs(2),
            ..config
        };
        let server = ChatServer::bind(&config)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr();
        let registry = Arc::clone(server.registry());

        let shutdown = Arc::new(GracefulShutdown::new(config.drain_timeout));
        let task = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                server.run(&shutdown).await.expect("Chat server failed");
            })
        };

        Self {
            addr,
            registry,
            shutdown,
            task: Some(task),
        }
    }

    /// Stop accepting, close every connection and wait for the server task.
    pub async fn stop(mut self) {
        self.shutdown.trigger_stop();
        if let Some(task) = self.task.take() {
            timeout(DEFAULT_TIMEOUT, task)
                .await
                .expect("Server did not stop in time")
                .expect("Server task panicked");
        }
    }

    /// Wait until exactly `names` are registered.
    pub async fn wait_for_users(&self, names: &[&str]) {
        let mut expected: Vec<&str> = names.to_vec();
        expected.sort_unstable();
        timeout(DEFAULT_TIMEOUT, async {
            loop {
                let current: Vec<String> =
                    self.registry.usernames().iter().map(Username::to_string).collect();
                if current == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "Registry never reached {expected:?}, have {:?}",
                self.registry.usernames()
            )
        });
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger_stop();
    }
}

/// Raw line client.
pub struct LineClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl LineClient {
    /// Connect to a server.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("Connect timed out")
            .expect("Failed to connect to test server");
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    /// Connect, read the prompt and register `name`, consuming the welcome
    /// and the join notice for `name`.
    ///
    /// Join notices of users registering concurrently may interleave with
    /// the welcome; they are skipped.
    pub async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect_prompt().await;
        client.send(name).await;

        let own_notice = format!("{name} has joined the chat.");
        let mut welcomed = false;
        loop {
            match client.recv_message().await {
                ServerMessage::Ok { text } => {
                    assert!(text.starts_with(&format!("Welcome {name}!")));
                    welcomed = true;
                }
                ServerMessage::System { text, .. } if text == own_notice => {
                    assert!(welcomed, "{name}: join notice before welcome");
                    return client;
                }
                ServerMessage::System { text, .. } if text.ends_with(" has joined the chat.") => {}
                other => panic!("{name}: unexpected line while joining: {other:?}"),
            }
        }
    }

    /// Send one line.
    pub async fn send(&mut self, line: &str) {
        timeout(DEFAULT_TIMEOUT, self.framed.send(line))
            .await
            .expect("Send timed out")
            .expect("Send failed");
    }

    /// Receive one raw line.
    pub async fn recv(&mut self) -> String {
        timeout(DEFAULT_TIMEOUT, self.framed.next())
            .await
            .expect("Timed out waiting for a line")
            .expect("Connection closed while waiting for a line")
            .expect("Failed to read line")
    }

    /// Receive and decode one line.
    pub async fn recv_message(&mut self) -> ServerMessage {
        let line = self.recv().await;
        line.parse()
            .unwrap_or_else(|e| panic!("Undecodable line {line:?}: {e}"))
    }

    /// Expect the username prompt.
    pub async fn expect_prompt(&mut self) {
        match self.recv_message().await {
            ServerMessage::EnterName { .. } => {}
            other => panic!("Expected ENTERNAME, got {other:?}"),
        }
    }

    /// Expect a `SYSTEM` line with exactly `expected` text.
    pub async fn expect_system(&mut self, expected: &str) {
        match self.recv_message().await {
            ServerMessage::System { text, .. } => assert_eq!(text, expected),
            other => panic!("Expected SYSTEM {expected:?}, got {other:?}"),
        }
    }

    /// Send `/list` and return the names, sorted.
    pub async fn list(&mut self) -> Vec<String> {
        self.send("/list").await;
        match self.recv_message().await {
            ServerMessage::Users { mut names } => {
                names.sort();
                names
            }
            other => panic!("Expected USERS, got {other:?}"),
        }
    }

    /// Assert that no line arrives within the quiet period.
    pub async fn assert_silent(&mut self) {
        if let Ok(next) = timeout(QUIET_PERIOD, self.framed.next()).await {
            panic!("Expected silence, got {next:?}");
        }
    }

    /// Assert that the server closes the connection.
    pub async fn expect_closed(&mut self) {
        let next = timeout(DEFAULT_TIMEOUT, self.framed.next())
            .await
            .expect("Timed out waiting for the server to close");
        match next {
            None | Some(Err(_)) => {}
            Some(Ok(line)) => panic!("Expected close, got line {line:?}"),
        }
    }
}
