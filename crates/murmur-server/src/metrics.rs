//! Chat server metrics.
//!
//! Instruments come from the global OpenTelemetry meter. This crate never
//! installs a `MeterProvider`: the host process must call
//! `opentelemetry::global::set_meter_provider` (for example with an
//! `opentelemetry_sdk` provider and an exporter) before the first connection,
//! or every instrument stays a no-op. The meter is cached on first use, so
//! a provider installed later is not picked up.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("murmur-server"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for lines routed to recipients.
pub fn messages_routed() -> Counter<u64> {
    meter()
        .u64_counter("murmur.messages.routed")
        .with_description("Total lines enqueued to recipients")
        .with_unit("message")
        .build()
}

/// Counter for connections reaped after a failed send.
pub fn connections_reaped() -> Counter<u64> {
    meter()
        .u64_counter("murmur.connections.reaped")
        .with_description("Connections removed after a failed send")
        .with_unit("connection")
        .build()
}

/// Counter for username registration attempts.
pub fn registrations() -> Counter<u64> {
    meter()
        .u64_counter("murmur.registrations")
        .with_description("Username registration attempts")
        .with_unit("attempt")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered users.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("murmur.connections.active")
        .with_description("Current number of registered users")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record lines enqueued by one routing call.
pub fn record_routed(kind: &str, recipients: usize) {
    if recipients == 0 {
        return;
    }
    messages_routed().add(
        recipients as u64,
        &[KeyValue::new("kind", kind.to_string())],
    );
}

/// Record a reaped connection.
pub fn record_reaped() {
    connections_reaped().add(1, &[]);
}

/// Record a registration attempt. `outcome` is `ok`, `empty` or `duplicate`.
pub fn record_registration(outcome: &str) {
    registrations().add(1, &[KeyValue::new("outcome", outcome.to_string())]);
}

/// Record the current number of registered users.
pub fn record_active_users(count: usize) {
    connections_active().record(count as i64, &[]);
}
