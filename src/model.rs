//! Core data model.
//!
//! A turn is a queued service ticket. It has identity (number + module),
//! a lifecycle state, an optional priority reason, and optionally the
//! patient and appointment it was issued for. Patients and appointments are
//! owned by the backend; here they only label turns.

pub mod patient;
pub mod turn;

pub use patient::{Appointment, AppointmentStatus, Document, DocumentType, Patient};
pub use turn::{
    Bucket, Lane, Module, OperatorRole, PriorityReason, Turn, TurnKey, TurnNumber, TurnState,
    Urgency, bucket, rank,
};
