//! The kiosk assignment wizard.
//!
//! [`Wizard`] is a pure state machine: every action validates the current
//! step and either advances, goes back, or fails without side effects.
//! [`Kiosk`] drives it against a backend and the ticket pipeline.
//!
//! ```text
//! ServiceSelect -> [PriorityTypeSelect] -> DocumentTypeSelect -> DocumentEntry
//!               -> [PatientConfirm] -> Success -> (dwell) -> ServiceSelect
//! ```

pub mod dispatch;
pub mod kiosk;

pub use dispatch::{AssignOperation, FlowVariant, PrioritySubtype, Service, resolve};
pub use kiosk::Kiosk;

use std::fmt;

use crate::backend::{BillingTurnRequest, PatientSearch};
use crate::error::{Error, ErrorClass, Result};
use crate::model::{Appointment, Document, DocumentType, Patient, PriorityReason, Turn};
use crate::ticket::DeliveryOutcome;

/// Longest document number the keypad accepts.
pub const MAX_DOCUMENT_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    ServiceSelect,
    PriorityTypeSelect,
    DocumentTypeSelect,
    DocumentEntry,
    PatientConfirm,
    Success,
}

/// Message shown to the patient on the current screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PatientNotFound,
    NoAppointments,
    /// The backend could not be reached; the patient may try again.
    ServiceUnavailable,
    Rejected(String),
    /// The kiosk is misconfigured; staff must intervene.
    ConfigurationError,
    TicketNotPrinted,
}

impl Notice {
    fn for_error(error: &Error) -> Self {
        match (error, error.class()) {
            (Error::NotFound(_), _) => Notice::PatientNotFound,
            (Error::Rejected(message), _) => Notice::Rejected(message.clone()),
            (_, ErrorClass::Transient) => Notice::ServiceUnavailable,
            (_, ErrorClass::Configuration) => Notice::ConfigurationError,
            _ => Notice::ServiceUnavailable,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PatientNotFound => {
                f.write_str("Paciente no encontrado. Verifique el documento ingresado.")
            }
            Notice::NoAppointments => f.write_str("No tiene citas programadas para hoy."),
            Notice::ServiceUnavailable => {
                f.write_str("El servicio no está disponible. Intente nuevamente.")
            }
            Notice::Rejected(message) => write!(f, "No fue posible asignar el turno: {message}"),
            Notice::ConfigurationError => {
                f.write_str("Opción no disponible. Solicite ayuda al personal.")
            }
            Notice::TicketNotPrinted => f.write_str(
                "No se pudo imprimir el tiquete. Recuerde su número de turno.",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    NotStarted,
    Pending,
    Printed { stage: String },
    Failed,
}

/// The backend call a completed wizard makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Billing(BillingTurnRequest),
    Appointment {
        document: Document,
        display_name: Option<String>,
    },
    Priority {
        document: Document,
        reason: PriorityReason,
        display_name: Option<String>,
    },
}

/// A submission bound to the session that produced it.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub session: u64,
    pub service: Service,
    pub flow: FlowVariant,
    pub submission: Submission,
}

#[derive(Debug, Clone)]
pub struct Wizard {
    step: Step,
    session: u64,
    busy: bool,
    service: Option<Service>,
    priority: Option<(PrioritySubtype, PriorityReason)>,
    document_type: Option<DocumentType>,
    document_number: String,
    search: Option<PatientSearch>,
    selected_appointment: usize,
    issued: Option<Turn>,
    delivery: DeliveryStatus,
    notice: Option<Notice>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            step: Step::ServiceSelect,
            session: 0,
            busy: false,
            service: None,
            priority: None,
            document_type: None,
            document_number: String::new(),
            search: None,
            selected_appointment: 0,
            issued: None,
            delivery: DeliveryStatus::NotStarted,
            notice: None,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn step(&self) -> Step {
        self.step
    }

    /// Bumped on every reset; async completions carry it to detect staleness.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn service(&self) -> Option<Service> {
        self.service
    }

    pub fn priority(&self) -> Option<&(PrioritySubtype, PriorityReason)> {
        self.priority.as_ref()
    }

    pub fn document_type(&self) -> Option<DocumentType> {
        self.document_type
    }

    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    pub fn patient(&self) -> Option<&Patient> {
        self.search.as_ref().and_then(|s| s.patient.as_ref())
    }

    pub fn appointments(&self) -> &[Appointment] {
        self.search
            .as_ref()
            .map(|s| s.appointments.as_slice())
            .unwrap_or(&[])
    }

    pub fn selected_appointment(&self) -> Option<&Appointment> {
        self.appointments().get(self.selected_appointment)
    }

    pub fn issued(&self) -> Option<&Turn> {
        self.issued.as_ref()
    }

    pub fn delivery(&self) -> &DeliveryStatus {
        &self.delivery
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// The flow the current selections map to.
    pub fn flow(&self) -> Result<FlowVariant> {
        let service = self
            .service
            .ok_or_else(|| Error::InvalidStep("no service selected".to_string()))?;
        resolve(service, self.priority.as_ref().map(|(subtype, _)| *subtype))
    }

    pub fn document(&self) -> Result<Document> {
        let kind = self
            .document_type
            .ok_or_else(|| Error::InvalidStep("no document type selected".to_string()))?;
        Document::new(kind, &self.document_number)
    }

    // -- Forward actions ----------------------------------------------------

    pub fn select_service(&mut self, service: Service) -> Result<()> {
        self.expect(Step::ServiceSelect)?;
        self.service = Some(service);
        self.notice = None;
        self.step = if service == Service::Priority {
            Step::PriorityTypeSelect
        } else {
            Step::DocumentTypeSelect
        };
        Ok(())
    }

    /// The reason is required; the kiosk never assumes one.
    pub fn select_priority(&mut self, subtype: PrioritySubtype, reason: PriorityReason) -> Result<()> {
        self.expect(Step::PriorityTypeSelect)?;
        if reason == PriorityReason::Unspecified {
            return Err(Error::InvalidStep("a priority reason must be chosen".to_string()));
        }
        self.priority = Some((subtype, reason));
        self.notice = None;
        self.step = Step::DocumentTypeSelect;
        Ok(())
    }

    pub fn select_document_type(&mut self, kind: DocumentType) -> Result<()> {
        self.expect(Step::DocumentTypeSelect)?;
        self.document_type = Some(kind);
        self.document_number.clear();
        self.notice = None;
        self.step = Step::DocumentEntry;
        Ok(())
    }

    pub fn push_digit(&mut self, c: char) -> Result<()> {
        self.expect_idle(Step::DocumentEntry)?;
        if !c.is_ascii_alphanumeric() {
            return Err(Error::InvalidStep(format!("invalid document character {c:?}")));
        }
        if self.document_number.len() >= MAX_DOCUMENT_LEN {
            return Err(Error::InvalidStep("document number is too long".to_string()));
        }
        self.document_number.push(c.to_ascii_uppercase());
        self.notice = None;
        Ok(())
    }

    pub fn backspace(&mut self) -> Result<()> {
        self.expect_idle(Step::DocumentEntry)?;
        self.document_number.pop();
        Ok(())
    }

    pub fn clear_document(&mut self) -> Result<()> {
        self.expect_idle(Step::DocumentEntry)?;
        self.document_number.clear();
        Ok(())
    }

    /// Replace the whole number, as if typed.
    pub fn set_document_number(&mut self, number: &str) -> Result<()> {
        self.clear_document()?;
        number.trim().chars().try_for_each(|c| self.push_digit(c))
    }

    pub fn select_appointment(&mut self, index: usize) -> Result<()> {
        self.expect_idle(Step::PatientConfirm)?;
        if index >= self.appointments().len() {
            return Err(Error::InvalidStep(format!("no appointment at position {index}")));
        }
        self.selected_appointment = index;
        Ok(())
    }

    // -- Backward actions ---------------------------------------------------

    /// Return to an earlier step, discarding whatever was collected after it.
    pub fn back_to(&mut self, target: Step) -> Result<()> {
        if self.busy {
            return Err(Error::InvalidStep("a request is in progress".to_string()));
        }
        if self.step == Step::Success || target >= self.step {
            return Err(Error::InvalidStep(format!(
                "cannot go back from {:?} to {target:?}",
                self.step
            )));
        }
        if target == Step::PriorityTypeSelect && self.service != Some(Service::Priority) {
            return Err(Error::InvalidStep(
                "priority selection is not part of this flow".to_string(),
            ));
        }

        if target < Step::PatientConfirm {
            self.search = None;
            self.selected_appointment = 0;
        }
        if target < Step::DocumentEntry {
            self.document_type = None;
            self.document_number.clear();
        }
        if target < Step::DocumentTypeSelect {
            self.priority = None;
        }
        if target == Step::ServiceSelect {
            self.service = None;
        }
        self.notice = None;
        self.step = target;
        Ok(())
    }

    /// Start a new session from the first screen.
    pub fn reset(&mut self) {
        let session = self.session + 1;
        *self = Self::new();
        self.session = session;
    }

    // -- Lookup -------------------------------------------------------------

    /// Check the wizard may search, and mark it busy.
    pub fn begin_search(&mut self) -> Result<(u64, Document)> {
        self.expect_idle(Step::DocumentEntry)?;
        let flow = self.flow()?;
        if !flow.requires_lookup {
            return Err(Error::InvalidStep(
                "this flow does not look the patient up".to_string(),
            ));
        }
        let document = self.document()?;
        self.busy = true;
        self.notice = None;
        Ok((self.session, document))
    }

    /// Apply a search result. A patient without appointments stays on
    /// document entry.
    pub fn finish_search(&mut self, session: u64, result: Result<PatientSearch>) -> Result<()> {
        if session != self.session {
            return Ok(());
        }
        self.busy = false;
        let found = match result {
            Ok(found) => found,
            Err(e) => {
                self.notice = Some(Notice::for_error(&e));
                return Err(e);
            }
        };
        let Some(patient) = found.patient.as_ref() else {
            self.notice = Some(Notice::PatientNotFound);
            return Err(Error::NotFound(format!("patient {}", self.document()?)));
        };
        if found.appointments.is_empty() {
            self.notice = Some(Notice::NoAppointments);
            return Err(Error::NotFound(format!(
                "no appointments today for patient {}",
                patient.reference
            )));
        }
        self.search = Some(found);
        self.selected_appointment = 0;
        self.step = Step::PatientConfirm;
        Ok(())
    }

    // -- Submit -------------------------------------------------------------

    /// Build the backend call for the current selections, and mark busy.
    pub fn begin_submit(&mut self) -> Result<PendingSubmission> {
        if self.busy {
            return Err(Error::InvalidStep("a request is in progress".to_string()));
        }
        let service = self
            .service
            .ok_or_else(|| Error::InvalidStep("no service selected".to_string()))?;
        let flow = match self.flow() {
            Ok(flow) => flow,
            Err(e) => {
                self.notice = Some(Notice::for_error(&e));
                return Err(e);
            }
        };
        let ready_at = if flow.requires_lookup {
            Step::PatientConfirm
        } else {
            Step::DocumentEntry
        };
        self.expect(ready_at)?;

        let reason = self.priority.as_ref().map(|(_, reason)| reason.clone());
        let submission = match flow.operation {
            AssignOperation::BillingTurn => {
                let patient = self
                    .patient()
                    .ok_or_else(|| Error::InvalidStep("no patient located".to_string()))?;
                let appointment = self
                    .selected_appointment()
                    .ok_or_else(|| Error::InvalidStep("no appointment selected".to_string()))?;
                Submission::Billing(BillingTurnRequest {
                    patient_ref: patient.reference,
                    appointment_ref: appointment.id,
                    priority: reason,
                })
            }
            AssignOperation::AppointmentTurn => Submission::Appointment {
                document: self.document()?,
                display_name: None,
            },
            AssignOperation::PriorityTurn => Submission::Priority {
                document: self.document()?,
                reason: reason
                    .ok_or_else(|| Error::InvalidStep("no priority reason chosen".to_string()))?,
                display_name: None,
            },
        };

        self.busy = true;
        self.notice = None;
        Ok(PendingSubmission {
            session: self.session,
            service,
            flow,
            submission,
        })
    }

    /// Record the backend's answer. Only a reported success creates a turn.
    pub fn finish_submit(&mut self, session: u64, result: &Result<Turn>) {
        if session != self.session {
            return;
        }
        self.busy = false;
        match result {
            Ok(turn) => {
                self.issued = Some(turn.clone());
                self.delivery = DeliveryStatus::Pending;
                self.notice = None;
                self.step = Step::Success;
            }
            Err(e) => self.notice = Some(Notice::for_error(e)),
        }
    }

    pub fn record_delivery(&mut self, session: u64, outcome: &DeliveryOutcome) {
        if session != self.session || self.step != Step::Success {
            return;
        }
        if outcome.success {
            self.delivery = DeliveryStatus::Printed {
                stage: outcome.stage.clone().unwrap_or_default(),
            };
        } else {
            self.delivery = DeliveryStatus::Failed;
            self.notice = Some(Notice::TicketNotPrinted);
        }
    }

    /// Dwell timer fired. Returns whether the wizard was reset.
    pub fn expire(&mut self, session: u64) -> bool {
        if session != self.session || self.step != Step::Success {
            return false;
        }
        self.reset();
        true
    }

    // -- Helpers ------------------------------------------------------------

    fn expect(&self, step: Step) -> Result<()> {
        if self.step != step {
            return Err(Error::InvalidStep(format!(
                "expected step {step:?}, wizard is at {:?}",
                self.step
            )));
        }
        Ok(())
    }

    fn expect_idle(&self, step: Step) -> Result<()> {
        self.expect(step)?;
        if self.busy {
            return Err(Error::InvalidStep("a request is in progress".to_string()));
        }
        Ok(())
    }
}
