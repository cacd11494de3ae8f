//! Span helpers for the three long-lived flows: surface polling, turn
//! assignment, and ticket delivery.
//!
//! Result fields are declared empty and filled in once the flow settles.

use tracing::Span;
use uuid::Uuid;

/// Span for one surface poll. `poll.turns` is recorded after the fetch.
pub fn surface_poll_span(surface: &str, seq: u64) -> Span {
    tracing::info_span!(
        "surface.poll",
        "surface.name" = surface,
        "poll.seq" = seq,
        "poll.turns" = tracing::field::Empty,
    )
}

/// Span for a kiosk assignment attempt.
pub fn turn_assign_span(service: &str, session: u64) -> Span {
    tracing::info_span!(
        "turn.assign",
        "assign.service" = service,
        "assign.session" = session,
        "turn.number" = tracing::field::Empty,
    )
}

/// Span for a ticket delivery cascade.
pub fn ticket_deliver_span(turn: &str, delivery_id: &Uuid) -> Span {
    tracing::info_span!(
        "ticket.deliver",
        "turn.number" = turn,
        "delivery.id" = %delivery_id,
        "delivery.stage" = tracing::field::Empty,
        "delivery.attempts" = tracing::field::Empty,
    )
}

/// Record which stage (if any) delivered the ticket.
pub fn record_delivery(span: &Span, stage: Option<&str>, attempts: usize) {
    span.record("delivery.stage", stage.unwrap_or("none"));
    span.record("delivery.attempts", attempts as u64);
}
