// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Murmur Contributors

//! Murmur CLI - terminal client for the murmur chat server.
//!
//! Server lines are printed as they arrive; stdin lines are sent as typed.
//! `@user message` sends a private message, `/list` lists users and `/quit`
//! leaves.

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod render;

/// Time given to the server prompt to print before asking for a name.
const PROMPT_DELAY: Duration = Duration::from_millis(300);

/// Time given to the receiver to print trailing lines on exit.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Murmur CLI - terminal chat client
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(default_value_t = 7777)]
    port: u16,

    /// Username to register instead of prompting
    #[arg(short, long)]
    name: Option<String>,
}

type ServerSink = FramedWrite<OwnedWriteHalf, LinesCodec>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let stream = match TcpStream::connect((cli.host.as_str(), cli.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            println!("[!] Could not connect to {}:{} -> {}", cli.host, cli.port, e);
            return Ok(());
        }
    };
    let (read_half, write_half) = stream.into_split();
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());

    let mut receiver = tokio::spawn(receive_loop(read_half));
    let mut input = spawn_stdin_reader();

    let name = match cli.name {
        Some(name) => name,
        None => {
            tokio::time::sleep(PROMPT_DELAY).await;
            print!("Enter username: ");
            std::io::stdout().flush().context("Failed to flush stdout")?;
            input.recv().await.unwrap_or_default()
        }
    };
    let name = name.trim();
    if name.is_empty() {
        println!("Username cannot be empty. Exiting.");
        return Ok(());
    }
    if !send_line(&mut sink, name).await {
        return Ok(());
    }

    let mut disconnected = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, leaving");
                send_line(&mut sink, "/quit").await;
                break;
            }
            _ = &mut receiver => {
                disconnected = true;
                break;
            }
            line = input.recv() => {
                let Some(line) = line else {
                    send_line(&mut sink, "/quit").await;
                    break;
                };
                if line.is_empty() {
                    continue;
                }
                if line.trim() == "/quit" {
                    send_line(&mut sink, "/quit").await;
                    println!("[*] Quitting... bye.");
                    break;
                }
                if !send_line(&mut sink, &line).await {
                    break;
                }
            }
        }
    }

    if let Err(e) = SinkExt::<&str>::close(&mut sink).await {
        debug!(error = %e, "Failed to close connection");
    }
    if !disconnected {
        match tokio::time::timeout(EXIT_GRACE, receiver).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Receiver task failed"),
            Err(_) => debug!("Receiver still running at exit"),
        }
    }
    Ok(())
}

/// Log to stderr at `warn` unless `RUST_LOG` says otherwise.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .context("Failed to initialize logging")
}

/// Print server lines until the server closes the connection.
async fn receive_loop(read_half: OwnedReadHalf) {
    let mut lines = FramedRead::new(read_half, LinesCodec::new());

    while let Some(next) = lines.next().await {
        match next {
            Ok(line) => {
                if let Some(rendered) = render::render_line(&line, &Local) {
                    println!("{rendered}");
                }
            }
            Err(e) => {
                println!("[!] Receiver error: {e}");
                return;
            }
        }
    }
    println!("[!] Disconnected from server.");
}

/// Read stdin lines on a dedicated thread.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Send one line; returns `false` if the connection is gone.
async fn send_line(sink: &mut ServerSink, line: &str) -> bool {
    match sink.send(line).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to send line");
            false
        }
    }
}
