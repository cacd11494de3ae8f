//! In-process backend with scriptable responses.
//!
//! Keeps a live turn table and applies the same lifecycle rules the real
//! backend does. Listings can be scripted ahead of time, failures injected
//! per operation, and latency added per operation (driven by
//! `tokio::time`, so paused-clock tests stay deterministic).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{Backend, BillingTurnRequest, PatientSearch, PrintPayload, Statistics};
use crate::error::{Error, Result};
use crate::model::{
    Appointment, Document, DocumentType, Lane, Module, OperatorRole, Patient, PriorityReason,
    Turn, TurnNumber, TurnState,
};

pub const SEARCH_PATIENT: &str = "search_patient";
pub const ASSIGN_BILLING: &str = "assign_billing_turn";
pub const ASSIGN_APPOINTMENT: &str = "assign_appointment_turn";
pub const ASSIGN_PRIORITY: &str = "assign_priority_turn";
pub const LIST_ACTIVE: &str = "list_active_turns";
pub const CALL_TURN: &str = "call_turn";
pub const COMPLETE_TURN: &str = "complete_turn";
pub const CANCEL_TURN: &str = "cancel_turn";
pub const PRINT_TICKET: &str = "print_ticket";

#[derive(Debug, Clone)]
struct Registration {
    document: Document,
    patient: Patient,
    appointments: Vec<Appointment>,
}

#[derive(Default)]
struct State {
    turns: Vec<Turn>,
    scripted_listings: VecDeque<Vec<Turn>>,
    registrations: Vec<Registration>,
    failures: HashMap<&'static str, VecDeque<Error>>,
    latency: HashMap<&'static str, Duration>,
    calls: HashMap<&'static str, usize>,
    printed: Vec<(TurnNumber, PrintPayload)>,
    issued: HashMap<Module, u32>,
    listings_in_flight: usize,
    max_listings_in_flight: usize,
    document_types: Vec<DocumentType>,
    priority_reasons: Vec<PriorityReason>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Seeding ------------------------------------------------------------

    /// Register a patient and the appointments they have today.
    pub fn register_patient(
        &self,
        document: Document,
        patient: Patient,
        appointments: Vec<Appointment>,
    ) {
        self.lock().registrations.push(Registration {
            document,
            patient,
            appointments,
        });
    }

    /// Replace the live turn table.
    pub fn set_turns(&self, turns: Vec<Turn>) {
        self.lock().turns = turns;
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    /// Queue a listing to return verbatim (ignoring any lane filter) before
    /// the live table is consulted.
    pub fn script_listing(&self, turns: Vec<Turn>) {
        self.lock().scripted_listings.push_back(turns);
    }

    pub fn set_catalogs(&self, document_types: Vec<DocumentType>, reasons: Vec<PriorityReason>) {
        let mut state = self.lock();
        state.document_types = document_types;
        state.priority_reasons = reasons;
    }

    // -- Fault injection ----------------------------------------------------

    /// The next call to `operation` fails with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, operation: &'static str, error: Error) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Every later call to `operation` takes at least `latency`.
    pub fn set_latency(&self, operation: &'static str, latency: Duration) {
        self.lock().latency.insert(operation, latency);
    }

    // -- Inspection ---------------------------------------------------------

    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn printed(&self) -> Vec<(TurnNumber, PrintPayload)> {
        self.lock().printed.clone()
    }

    /// Highest number of listing requests that were ever outstanding at once.
    pub fn max_listings_in_flight(&self) -> usize {
        self.lock().max_listings_in_flight
    }

    // -- Internals ----------------------------------------------------------

    /// Count the call, wait out its latency, then surface an injected failure.
    async fn enter(&self, operation: &'static str) -> Result<()> {
        let (latency, failure) = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_default() += 1;
            let latency = state.latency.get(operation).copied();
            let failure = state
                .failures
                .get_mut(operation)
                .and_then(VecDeque::pop_front);
            (latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn issue(&self, module: Module, build: impl FnOnce(TurnNumber) -> Turn) -> Turn {
        let mut state = self.lock();
        let seq = state.issued.entry(module).or_default();
        *seq += 1;
        let prefix = match module {
            Module::Billing => 'F',
            Module::AppointmentAssignment => 'A',
            Module::Preferential => 'P',
        };
        let turn = build(TurnNumber::new(format!("{prefix}{:03}", *seq)));
        state.turns.push(turn.clone());
        turn
    }

    fn apply(&self, number: &TurnNumber, to: TurnState) -> Result<()> {
        let mut state = self.lock();
        let turn = state
            .turns
            .iter_mut()
            .find(|t| &t.number == number && !t.state.is_terminal())
            .ok_or_else(|| Error::NotFound(format!("turn {number}")))?;
        turn.transition(to)
            .map_err(|e| Error::Rejected(e.to_string()))
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn search_patient(&self, document: &Document) -> Result<PatientSearch> {
        self.enter(SEARCH_PATIENT).await?;
        let state = self.lock();
        Ok(state
            .registrations
            .iter()
            .find(|r| &r.document == document)
            .map(|r| PatientSearch {
                patient: Some(r.patient.clone()),
                appointments: r.appointments.clone(),
            })
            .unwrap_or_default())
    }

    async fn assign_billing_turn(&self, request: &BillingTurnRequest) -> Result<Turn> {
        self.enter(ASSIGN_BILLING).await?;
        let (patient, appointment) = {
            let state = self.lock();
            let registration = state
                .registrations
                .iter()
                .find(|r| r.patient.reference == request.patient_ref)
                .ok_or_else(|| Error::NotFound(format!("patient {}", request.patient_ref)))?;
            let appointment = registration
                .appointments
                .iter()
                .find(|a| a.id == request.appointment_ref)
                .cloned()
                .ok_or_else(|| {
                    Error::NotFound(format!("appointment {}", request.appointment_ref))
                })?;
            (registration.patient.clone(), appointment)
        };

        let module = if request.priority.is_some() {
            Module::Preferential
        } else {
            Module::Billing
        };
        let priority = request.priority.clone();
        Ok(self.issue(module, |number| {
            let mut turn = Turn::new(number, module, Utc::now())
                .with_operator_role(OperatorRole::BillingClerk)
                .with_patient_name(patient.full_name())
                .with_patient(patient)
                .with_appointment(appointment);
            turn.priority = priority;
            turn
        }))
    }

    async fn assign_appointment_turn(
        &self,
        document: &Document,
        display_name: Option<&str>,
    ) -> Result<Turn> {
        self.enter(ASSIGN_APPOINTMENT).await?;
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| document.to_string());
        Ok(self.issue(Module::AppointmentAssignment, |number| {
            Turn::new(number, Module::AppointmentAssignment, Utc::now())
                .with_operator_role(OperatorRole::AppointmentScheduler)
                .with_patient_name(name)
        }))
    }

    async fn assign_priority_turn(
        &self,
        document: &Document,
        reason: &PriorityReason,
        display_name: Option<&str>,
    ) -> Result<Turn> {
        self.enter(ASSIGN_PRIORITY).await?;
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| document.to_string());
        Ok(self.issue(Module::Preferential, |number| {
            Turn::new(number, Module::Preferential, Utc::now())
                .with_priority(reason.clone())
                .with_operator_role(OperatorRole::AppointmentScheduler)
                .with_patient_name(name)
        }))
    }

    async fn list_active_turns(&self, lane: Option<Lane>) -> Result<Vec<Turn>> {
        {
            let mut state = self.lock();
            state.listings_in_flight += 1;
            state.max_listings_in_flight =
                state.max_listings_in_flight.max(state.listings_in_flight);
        }
        let entered = self.enter(LIST_ACTIVE).await;

        let mut state = self.lock();
        state.listings_in_flight -= 1;
        entered?;

        if let Some(scripted) = state.scripted_listings.pop_front() {
            return Ok(scripted);
        }
        Ok(state
            .turns
            .iter()
            .filter(|t| !t.state.is_terminal())
            .filter(|t| lane.is_none_or(|lane| t.lane() == lane))
            .cloned()
            .collect())
    }

    async fn call_turn(&self, number: &TurnNumber) -> Result<()> {
        self.enter(CALL_TURN).await?;
        self.apply(number, TurnState::Called)
    }

    async fn complete_turn(&self, number: &TurnNumber) -> Result<()> {
        self.enter(COMPLETE_TURN).await?;
        self.apply(number, TurnState::Attended)
    }

    async fn cancel_turn(&self, number: &TurnNumber) -> Result<()> {
        self.enter(CANCEL_TURN).await?;
        self.apply(number, TurnState::Cancelled)
    }

    async fn print_ticket(&self, number: &TurnNumber, payload: &PrintPayload) -> Result<()> {
        self.enter(PRINT_TICKET).await?;
        self.lock().printed.push((number.clone(), payload.clone()));
        Ok(())
    }

    async fn document_types(&self) -> Result<Vec<DocumentType>> {
        Ok(self.lock().document_types.clone())
    }

    async fn priority_reasons(&self) -> Result<Vec<PriorityReason>> {
        Ok(self.lock().priority_reasons.clone())
    }

    async fn statistics(&self) -> Result<Statistics> {
        let state = self.lock();
        let count = |module: Module| {
            state
                .turns
                .iter()
                .filter(|t| t.module == module)
                .count() as u64
        };
        let total = state.turns.len() as u64;
        Ok(Statistics {
            total,
            preferential: count(Module::Preferential),
            billing: count(Module::Billing),
            appointment_assignment: count(Module::AppointmentAssignment),
            today: total,
        })
    }
}
