//! Which backend operation a completed wizard submits.
//!
//! The choice is a lookup over (service, priority subtype). Pairs that are
//! not declared here are a configuration error, never a default call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Module;

/// Service the patient picks on the first kiosk screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Billing,
    AppointmentAssignment,
    Priority,
}

impl Service {
    pub const ALL: [Service; 3] = [
        Service::Billing,
        Service::AppointmentAssignment,
        Service::Priority,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Service::Billing => "Facturación",
            Service::AppointmentAssignment => "Asignación de citas",
            Service::Priority => "Atención preferencial",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Service::Billing => "billing",
            Service::AppointmentAssignment => "appointment_assignment",
            Service::Priority => "priority",
        };
        f.write_str(s)
    }
}

/// What a priority patient came for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritySubtype {
    /// Billing of an existing appointment.
    ForBilling,
    /// Scheduling a new appointment.
    ForAppointment,
}

impl PrioritySubtype {
    pub const ALL: [PrioritySubtype; 2] =
        [PrioritySubtype::ForBilling, PrioritySubtype::ForAppointment];
}

impl fmt::Display for PrioritySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrioritySubtype::ForBilling => "for_billing",
            PrioritySubtype::ForAppointment => "for_appointment",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOperation {
    BillingTurn,
    AppointmentTurn,
    PriorityTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowVariant {
    pub operation: AssignOperation,
    /// Billing-linked flows must find the patient and an appointment first.
    pub requires_lookup: bool,
    /// Label printed on the ticket, taken from the service picked.
    pub ticket_module: Module,
}

pub const FLOW_TABLE: &[(Service, Option<PrioritySubtype>, FlowVariant)] = &[
    (
        Service::Billing,
        None,
        FlowVariant {
            operation: AssignOperation::BillingTurn,
            requires_lookup: true,
            ticket_module: Module::Billing,
        },
    ),
    (
        Service::AppointmentAssignment,
        None,
        FlowVariant {
            operation: AssignOperation::AppointmentTurn,
            requires_lookup: false,
            ticket_module: Module::AppointmentAssignment,
        },
    ),
    (
        Service::Priority,
        Some(PrioritySubtype::ForBilling),
        FlowVariant {
            operation: AssignOperation::BillingTurn,
            requires_lookup: true,
            ticket_module: Module::Preferential,
        },
    ),
    (
        Service::Priority,
        Some(PrioritySubtype::ForAppointment),
        FlowVariant {
            operation: AssignOperation::PriorityTurn,
            requires_lookup: false,
            ticket_module: Module::Preferential,
        },
    ),
];

pub fn resolve(service: Service, subtype: Option<PrioritySubtype>) -> Result<FlowVariant> {
    FLOW_TABLE
        .iter()
        .find(|(s, t, _)| *s == service && *t == subtype)
        .map(|(_, _, flow)| *flow)
        .ok_or_else(|| Error::UnmappedFlow {
            service: service.to_string(),
            subtype: subtype.map_or_else(|| "none".to_string(), |t| t.to_string()),
        })
}

pub fn declared_flows() -> impl Iterator<Item = (Service, Option<PrioritySubtype>)> {
    FLOW_TABLE.iter().map(|(service, subtype, _)| (*service, *subtype))
}
