//! Metric instrument factories for digiturno.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! When no provider is installed the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("digiturno")
}

/// Counter: display-surface polls.
/// Labels: `surface`, `result` ("ok" | "error" | "discarded").
pub fn surface_polls() -> Counter<u64> {
    meter()
        .u64_counter("digiturno.surface.polls")
        .with_description("Number of display surface polls")
        .build()
}

/// Counter: turns that newly entered the called state on a surface.
/// Labels: `surface`.
pub fn surface_new_arrivals() -> Counter<u64> {
    meter()
        .u64_counter("digiturno.surface.new_arrivals")
        .with_description("Turns newly called, as seen by a display surface")
        .build()
}

/// Counter: ticket delivery attempts.
/// Labels: `stage`, `result` ("ok" | "failed").
pub fn ticket_attempts() -> Counter<u64> {
    meter()
        .u64_counter("digiturno.ticket.attempts")
        .with_description("Number of ticket delivery stage attempts")
        .build()
}

/// Counter: turns issued through the kiosk.
/// Labels: `module`, `priority` ("true" | "false").
pub fn turns_assigned() -> Counter<u64> {
    meter()
        .u64_counter("digiturno.turns.assigned")
        .with_description("Number of turns issued")
        .build()
}

/// Histogram: backend request latency.
/// Labels: `operation`, `result` ("ok" | "error").
pub fn backend_request_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("digiturno.backend.request_duration_ms")
        .with_description("Backend request duration in milliseconds")
        .with_unit("ms")
        .build()
}
