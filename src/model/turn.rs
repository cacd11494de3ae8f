//! Turns, their lifecycle, and the ordering rule every surface shares.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patient::{Appointment, Patient};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Facility-scoped turn number. Not unique across days.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnNumber(pub String);

impl TurnNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TurnNumber {
    fn from(number: &str) -> Self {
        Self(number.to_string())
    }
}

impl From<String> for TurnNumber {
    fn from(number: String) -> Self {
        Self(number)
    }
}

/// The identity a display surface uses to recognise a turn across polls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnKey {
    pub number: TurnNumber,
    pub module: Module,
}

impl fmt::Display for TurnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.module.code())
    }
}

// ---------------------------------------------------------------------------
// Module / lane
// ---------------------------------------------------------------------------

/// Service category a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Billing,
    AppointmentAssignment,
    Preferential,
}

impl Module {
    pub const ALL: [Module; 3] = [
        Module::Billing,
        Module::AppointmentAssignment,
        Module::Preferential,
    ];

    /// Backend code.
    pub fn code(self) -> &'static str {
        match self {
            Module::Billing => "FACTURACION",
            Module::AppointmentAssignment => "ASIGNACION_CITA",
            Module::Preferential => "PREFERENCIAL",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.code().eq_ignore_ascii_case(code))
    }

    /// Kiosk service keys used when the ticket label is overridden.
    pub fn from_service_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "facturacion" => Some(Module::Billing),
            "asignacion" => Some(Module::AppointmentAssignment),
            "preferencial" => Some(Module::Preferential),
            _ => None,
        }
    }

    /// Label printed on tickets.
    pub fn ticket_label(self) -> &'static str {
        match self {
            Module::Billing => "FACTURACIÓN",
            Module::AppointmentAssignment => "ASIGNACIÓN DE CITAS",
            Module::Preferential => "TURNO PREFERENCIAL",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

/// Physical service lane. Preferential turns are served in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Billing,
    Appointments,
}

impl Lane {
    pub fn label(self) -> &'static str {
        match self {
            Lane::Billing => "FACTURACIÓN",
            Lane::Appointments => "ASIGNACIÓN DE CITAS",
        }
    }
}

/// Operator role hint the backend attaches to route preferential turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    BillingClerk,
    AppointmentScheduler,
}

impl OperatorRole {
    pub fn code(self) -> &'static str {
        match self {
            OperatorRole::BillingClerk => "FACTURADOR",
            OperatorRole::AppointmentScheduler => "ASIGNADOR_CITA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "FACTURADOR" => Some(OperatorRole::BillingClerk),
            "ASIGNADOR_CITA" => Some(OperatorRole::AppointmentScheduler),
            _ => None,
        }
    }

    pub fn lane(self) -> Lane {
        match self {
            OperatorRole::BillingClerk => Lane::Billing,
            OperatorRole::AppointmentScheduler => Lane::Appointments,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting to be called.
    Pending,
    /// Called to a desk; shown as "in progress" and alerted on.
    Called,
    /// Served. Terminal.
    Attended,
    /// Withdrawn. Terminal.
    Cancelled,
}

impl TurnState {
    /// Can transition from self to `to`? Transitions only move forward;
    /// cancel is the one way out of a non-terminal state.
    pub fn can_transition_to(self, to: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, to),
            (Pending, Called) | (Called, Attended) | (Pending, Cancelled) | (Called, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Attended | TurnState::Cancelled)
    }

    pub fn code(self) -> &'static str {
        match self {
            TurnState::Pending => "PENDIENTE",
            TurnState::Called => "LLAMADO",
            TurnState::Attended => "ATENDIDO",
            TurnState::Cancelled => "CANCELADO",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Some(TurnState::Pending),
            "LLAMADO" | "EN_ATENCION" => Some(TurnState::Called),
            "ATENDIDO" | "COMPLETADO" => Some(TurnState::Attended),
            "CANCELADO" => Some(TurnState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::Pending => "pending",
            TurnState::Called => "called",
            TurnState::Attended => "attended",
            TurnState::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Why a turn bypasses FIFO. Always carries a non-empty code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PriorityReason {
    Elderly,
    Pregnancy,
    Disability,
    Other(String),
    /// The backend flagged the turn as priority without a reason.
    Unspecified,
}

impl PriorityReason {
    pub fn code(&self) -> &str {
        match self {
            PriorityReason::Elderly => "TERCERA_EDAD",
            PriorityReason::Pregnancy => "EMBARAZO",
            PriorityReason::Disability => "DISCAPACIDAD",
            PriorityReason::Other(code) => code,
            PriorityReason::Unspecified => "SIN_MOTIVO",
        }
    }

    /// Returns `None` for an empty code.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_uppercase();
        let reason = match code.as_str() {
            "" => return None,
            "TERCERA_EDAD" | "ADULTO_MAYOR" => PriorityReason::Elderly,
            "EMBARAZO" => PriorityReason::Pregnancy,
            "DISCAPACIDAD" => PriorityReason::Disability,
            "SIN_MOTIVO" => PriorityReason::Unspecified,
            _ => PriorityReason::Other(code),
        };
        Some(reason)
    }

    pub fn label(&self) -> &str {
        match self {
            PriorityReason::Elderly => "Tercera edad",
            PriorityReason::Pregnancy => "Embarazo",
            PriorityReason::Disability => "Discapacidad",
            PriorityReason::Other(code) => code,
            PriorityReason::Unspecified => "Sin motivo",
        }
    }
}

impl From<PriorityReason> for String {
    fn from(reason: PriorityReason) -> Self {
        reason.code().to_string()
    }
}

impl TryFrom<String> for PriorityReason {
    type Error = Error;

    fn try_from(code: String) -> Result<Self> {
        PriorityReason::from_code(&code)
            .ok_or_else(|| Error::Malformed("empty priority reason code".to_string()))
    }
}

impl fmt::Display for PriorityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

/// A queued service ticket as observed from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub number: TurnNumber,
    pub module: Module,
    pub state: TurnState,

    /// Set once at creation. `None` when the backend sent something
    /// unparseable; treated as "now" for urgency.
    pub assigned_at: Option<DateTime<Utc>>,

    /// Present iff the turn is a priority turn.
    pub priority: Option<PriorityReason>,

    pub operator_role: Option<OperatorRole>,

    /// Display name the backend stored with the turn.
    pub patient_name: Option<String>,
    pub patient: Option<Patient>,
    pub appointment: Option<Appointment>,

    /// Sede the turn was issued at.
    pub site: Option<String>,
}

impl Turn {
    pub fn new(number: impl Into<TurnNumber>, module: Module, assigned_at: DateTime<Utc>) -> Self {
        Self {
            number: number.into(),
            module,
            state: TurnState::Pending,
            assigned_at: Some(assigned_at),
            priority: None,
            operator_role: None,
            patient_name: None,
            patient: None,
            appointment: None,
            site: None,
        }
    }

    pub fn with_state(mut self, state: TurnState) -> Self {
        self.state = state;
        self
    }

    pub fn with_priority(mut self, reason: PriorityReason) -> Self {
        self.priority = Some(reason);
        self
    }

    pub fn with_operator_role(mut self, role: OperatorRole) -> Self {
        self.operator_role = Some(role);
        self
    }

    pub fn with_patient_name(mut self, name: impl Into<String>) -> Self {
        self.patient_name = Some(name.into());
        self
    }

    pub fn with_patient(mut self, patient: Patient) -> Self {
        self.patient = Some(patient);
        self
    }

    pub fn with_appointment(mut self, appointment: Appointment) -> Self {
        self.appointment = Some(appointment);
        self
    }

    pub fn key(&self) -> TurnKey {
        TurnKey {
            number: self.number.clone(),
            module: self.module,
        }
    }

    pub fn is_priority(&self) -> bool {
        self.priority.is_some()
    }

    /// The lane that serves this turn. Preferential turns follow the
    /// operator-role hint; without one they are served at billing.
    pub fn lane(&self) -> Lane {
        match self.module {
            Module::Billing => Lane::Billing,
            Module::AppointmentAssignment => Lane::Appointments,
            Module::Preferential => self
                .operator_role
                .map(OperatorRole::lane)
                .unwrap_or(Lane::Billing),
        }
    }

    /// Where the waiting-room monitor tells the patient to go.
    pub fn destination_label(&self) -> &'static str {
        match (self.module, self.operator_role) {
            (Module::Preferential, Some(role)) => role.lane().label(),
            (Module::Preferential, None) => "PREFERENCIAL",
            (Module::Billing, _) => Lane::Billing.label(),
            (Module::AppointmentAssignment, _) => Lane::Appointments.label(),
        }
    }

    /// Full patient name when known, else the stored display name.
    pub fn display_name(&self) -> Option<String> {
        self.patient
            .as_ref()
            .map(Patient::full_name)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.patient_name
                    .as_ref()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
            })
    }

    /// Apply a state transition, rejecting anything the lifecycle forbids.
    pub fn transition(&mut self, to: TurnState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn urgency(&self, now: DateTime<Utc>) -> Urgency {
        Urgency::classify(self.assigned_at, now)
    }
}

// ---------------------------------------------------------------------------
// Classification and ordering
// ---------------------------------------------------------------------------

/// Which half of an active listing a turn is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Pending,
    Called,
}

/// `None` for attended and cancelled turns, which no active view shows.
pub fn bucket(turn: &Turn) -> Option<Bucket> {
    match turn.state {
        TurnState::Pending => Some(Bucket::Pending),
        TurnState::Called => Some(Bucket::Called),
        TurnState::Attended | TurnState::Cancelled => None,
    }
}

/// Priority turns first, then FIFO by assignment time. A missing timestamp
/// means "now", so it sorts after every timestamped turn of its class.
/// Number and module break the remaining ties, which keeps the order total.
pub fn rank(a: &Turn, b: &Turn) -> Ordering {
    b.is_priority()
        .cmp(&a.is_priority())
        .then_with(|| match (a.assigned_at, b.assigned_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.number.cmp(&b.number))
        .then_with(|| a.module.cmp(&b.module))
}

/// Visual urgency of a waiting turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    /// Waiting more than 30 minutes.
    Elevated,
    /// Waiting more than 60 minutes.
    Critical,
}

impl Urgency {
    pub const ELEVATED_AFTER_MINUTES: i64 = 30;
    pub const CRITICAL_AFTER_MINUTES: i64 = 60;

    pub fn classify(assigned_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let waited = assigned_at.map(|t| (now - t).num_minutes()).unwrap_or(0);
        if waited > Self::CRITICAL_AFTER_MINUTES {
            Urgency::Critical
        } else if waited > Self::ELEVATED_AFTER_MINUTES {
            Urgency::Elevated
        } else {
            Urgency::Normal
        }
    }
}
