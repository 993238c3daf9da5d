// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Murmur Contributors

//! Human-readable rendering of server lines.

use std::fmt::Display;

use chrono::TimeZone;
use murmur_proto::ServerMessage;

const TIME_FORMAT: &str = "%H:%M:%S";

/// Render one raw server line for the terminal.
///
/// Returns `None` for blank lines. Lines that do not decode are shown raw.
pub fn render_line<Tz>(line: &str, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    Some(match line.parse::<ServerMessage>() {
        Ok(message) => render_message(&message, tz),
        Err(_) => format!("RAW> {line}"),
    })
}

/// Render a decoded server message.
pub fn render_message<Tz>(message: &ServerMessage, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match message {
        ServerMessage::EnterName { prompt } => prompt.clone(),
        ServerMessage::Ok { text } => text.clone(),
        ServerMessage::System { timestamp, text } => {
            format!("[SYSTEM {}] {text}", clock(*timestamp, tz))
        }
        ServerMessage::Msg {
            from,
            timestamp,
            text,
        } => format!("[{}] {from}: {text}", clock(*timestamp, tz)),
        ServerMessage::Private {
            from,
            timestamp,
            text,
            ..
        } => format!("[{}] [PRIVATE] {from} -> you: {text}", clock(*timestamp, tz)),
        ServerMessage::SentPrivate {
            to,
            timestamp,
            text,
        } => format!("[{}] [PRIVATE][you -> {to}]: {text}", clock(*timestamp, tz)),
        ServerMessage::Users { names } => format!("[USERS] {}", names.join(",")),
        ServerMessage::Error { code, text } => format!("[ERROR {code}] {text}"),
    }
}

fn clock<Tz>(timestamp: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    tz.timestamp_opt(timestamp, 0)
        .single()
        .map(|time| time.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}
