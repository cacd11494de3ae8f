//! The backend collaborator: the remote source of truth for turns.
//!
//! Every surface, the kiosk, and the operator desk talk to the backend only
//! through [`Backend`]. [`HttpBackend`] speaks the REST service;
//! [`InMemoryBackend`] is a scriptable stand-in for tests and demos.

pub mod http;
pub mod memory;
pub mod wire;

pub use http::HttpBackend;
pub use memory::InMemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::model::{
    Appointment, Document, DocumentType, Lane, Patient, PriorityReason, Turn, TurnNumber,
};

/// Result of looking a patient up by document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSearch {
    /// `None` when no patient is registered under the document.
    pub patient: Option<Patient>,
    /// Appointments scheduled for today.
    pub appointments: Vec<Appointment>,
}

/// A billing turn is issued against a patient's existing appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingTurnRequest {
    pub patient_ref: i64,
    pub appointment_ref: i64,
    pub priority: Option<PriorityReason>,
}

/// What the remote print service receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintPayload {
    /// Styled encoding with the plain text as fallback.
    Structured { structured: String, plain: String },
    /// Plain text only, for printers that cannot render the styled form.
    PlainOnly { plain: String },
}

/// Daily counters the backend keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: u64,
    pub preferential: u64,
    pub billing: u64,
    pub appointment_assignment: u64,
    pub today: u64,
}

/// Operations the backend exposes to this client.
///
/// Implementations must be cheap to share (`Arc<dyn Backend>`); every call
/// is an independent request with its own timeout.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn search_patient(&self, document: &Document) -> Result<PatientSearch>;

    async fn assign_billing_turn(&self, request: &BillingTurnRequest) -> Result<Turn>;

    async fn assign_appointment_turn(
        &self,
        document: &Document,
        display_name: Option<&str>,
    ) -> Result<Turn>;

    async fn assign_priority_turn(
        &self,
        document: &Document,
        reason: &PriorityReason,
        display_name: Option<&str>,
    ) -> Result<Turn>;

    /// Active (pending + called) turns, optionally narrowed to one lane.
    async fn list_active_turns(&self, lane: Option<Lane>) -> Result<Vec<Turn>>;

    async fn call_turn(&self, number: &TurnNumber) -> Result<()>;

    async fn complete_turn(&self, number: &TurnNumber) -> Result<()>;

    async fn cancel_turn(&self, number: &TurnNumber) -> Result<()>;

    async fn print_ticket(&self, number: &TurnNumber, payload: &PrintPayload) -> Result<()>;

    async fn document_types(&self) -> Result<Vec<DocumentType>>;

    async fn priority_reasons(&self) -> Result<Vec<PriorityReason>>;

    async fn statistics(&self) -> Result<Statistics>;
}

/// Document types offered by the kiosk, or the built-in list when the
/// backend catalog is unreachable or empty.
pub async fn document_types_or_default(backend: &dyn Backend) -> Vec<DocumentType> {
    match backend.document_types().await {
        Ok(types) if !types.is_empty() => types,
        Ok(_) => default_document_types(),
        Err(e) => {
            warn!(error = %e, "document type catalog unavailable, using defaults");
            default_document_types()
        }
    }
}

/// Priority reasons offered by the kiosk, or the built-in list.
pub async fn priority_reasons_or_default(backend: &dyn Backend) -> Vec<PriorityReason> {
    match backend.priority_reasons().await {
        Ok(reasons) if !reasons.is_empty() => reasons,
        Ok(_) => default_priority_reasons(),
        Err(e) => {
            warn!(error = %e, "priority reason catalog unavailable, using defaults");
            default_priority_reasons()
        }
    }
}

fn default_document_types() -> Vec<DocumentType> {
    vec![
        DocumentType::CC,
        DocumentType::TI,
        DocumentType::CE,
        DocumentType::PA,
    ]
}

fn default_priority_reasons() -> Vec<PriorityReason> {
    vec![
        PriorityReason::Pregnancy,
        PriorityReason::Disability,
        PriorityReason::Elderly,
    ]
}
