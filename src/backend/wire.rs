//! JSON shapes exchanged with the REST backend and their conversion into
//! domain types.
//!
//! The backend is loose about types (turn numbers arrive as strings or
//! numbers, timestamps with or without an offset), so decoding is lenient
//! and validation happens in the `TryFrom` conversions.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use super::Statistics;
use crate::error::{Error, Result};
use crate::model::{
    Appointment, AppointmentStatus, Document, DocumentType, Module, OperatorRole, Patient,
    PriorityReason, Turn, TurnState,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub tipo_documento: &'a str,
    pub numero_documento: &'a str,
}

impl<'a> SearchRequest<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            tipo_documento: document.kind.code(),
            numero_documento: &document.number,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BillingAssignRequest<'a> {
    pub numero_paciente: i64,
    pub id_cita: i64,
    pub modulo: &'a str,
    pub es_preferencial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo_preferencial: Option<&'a str>,
    /// Billing turns are always routed to a billing clerk, priority or not.
    pub tipo_operador_override: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DocumentAssignRequest<'a> {
    pub tipo_documento: &'a str,
    pub numero_documento: &'a str,
    pub nombre_paciente: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo_preferencial: Option<&'a str>,
}

impl<'a> DocumentAssignRequest<'a> {
    /// Without a display name the backend stores "<type> <number>".
    pub fn new(
        document: &'a Document,
        display_name: Option<&str>,
        reason: Option<&'a PriorityReason>,
    ) -> Self {
        let nombre_paciente = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| document.to_string());
        Self {
            tipo_documento: document.kind.code(),
            numero_documento: &document.number,
            nombre_paciente,
            motivo_preferencial: reason.map(PriorityReason::code),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PrintRequest<'a> {
    pub numero_turno: &'a str,
    pub ticket_content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_content_plain: Option<&'a str>,
    pub ticket_format: &'a str,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Minimal envelope used for acknowledgements and error bodies.
#[derive(Debug, Default, Deserialize)]
pub struct AckEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub mensaje: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl AckEnvelope {
    /// Human-readable reason the backend gave, if any.
    pub fn message(&self) -> Option<&str> {
        self.detail
            .as_deref()
            .or(self.mensaje.as_deref())
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct TurnEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub turno: Option<WireTurn>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

/// Listing entries stay as raw JSON so one bad entry does not sink the
/// whole listing.
#[derive(Debug, Deserialize)]
pub struct ListingEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, alias = "datos")]
    pub turnos: Vec<serde_json::Value>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub paciente: Option<WirePatient>,
    #[serde(default)]
    pub citas: Vec<WireAppointment>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CatalogItem {
    Code(String),
    Entry {
        codigo: String,
        #[serde(default)]
        nombre: Option<String>,
    },
}

impl CatalogItem {
    pub fn code(&self) -> &str {
        match self {
            CatalogItem::Code(code) => code,
            CatalogItem::Entry { codigo, .. } => codigo,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocumentTypesEnvelope {
    #[serde(default)]
    pub tipos: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityReasonsEnvelope {
    #[serde(default)]
    pub motivos: Vec<CatalogItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireStatistics {
    #[serde(default)]
    pub total_turnos: u64,
    #[serde(default)]
    pub turnos_preferenciales: u64,
    #[serde(default)]
    pub turnos_facturacion: u64,
    #[serde(default)]
    pub turnos_asignacion_cita: u64,
    #[serde(default)]
    pub turnos_hoy: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsEnvelope {
    #[serde(default)]
    pub estadisticas: WireStatistics,
}

impl From<WireStatistics> for Statistics {
    fn from(wire: WireStatistics) -> Self {
        Statistics {
            total: wire.total_turnos,
            preferential: wire.turnos_preferenciales,
            billing: wire.turnos_facturacion,
            appointment_assignment: wire.turnos_asignacion_cita,
            today: wire.turnos_hoy,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn / patient / appointment
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WireTurn {
    #[serde(deserialize_with = "string_or_number")]
    pub numero_turno: String,
    #[serde(default)]
    pub hora_asignacion: Option<String>,
    #[serde(default)]
    pub es_preferencial: Option<bool>,
    #[serde(default)]
    pub motivo_preferencial: Option<String>,
    #[serde(default)]
    pub sede: Option<String>,
    pub modulo: String,
    #[serde(default)]
    pub nombre_paciente: Option<String>,
    pub estado: String,
    #[serde(default)]
    pub tipo_operador: Option<String>,
    #[serde(default)]
    pub hora_cita: Option<String>,
    #[serde(default)]
    pub paciente: Option<WirePatient>,
    #[serde(default)]
    pub cita: Option<WireAppointment>,
}

#[derive(Debug, Deserialize)]
pub struct WirePatient {
    pub numero_paciente: i64,
    #[serde(default)]
    pub tipo_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id_paciente: Option<String>,
    #[serde(default)]
    pub nombre1: Option<String>,
    #[serde(default)]
    pub nombre2: Option<String>,
    #[serde(default)]
    pub apellido1: Option<String>,
    #[serde(default)]
    pub apellido2: Option<String>,
    #[serde(default)]
    pub fecha_nacimiento: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub telefono: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireAppointment {
    pub id_cita: i64,
    #[serde(default)]
    pub fecha_cita: Option<String>,
    #[serde(default)]
    pub hora_cita: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id_medico: Option<String>,
    #[serde(default)]
    pub procedimiento: Option<String>,
    #[serde(default)]
    pub estado: Option<i64>,
}

impl TryFrom<WireTurn> for Turn {
    type Error = Error;

    fn try_from(wire: WireTurn) -> Result<Self> {
        let number = wire.numero_turno.trim().to_string();
        if number.is_empty() {
            return Err(Error::Malformed("turn without a number".to_string()));
        }
        let module = Module::from_code(&wire.modulo)
            .ok_or_else(|| Error::Malformed(format!("unknown module {:?}", wire.modulo)))?;
        let state = TurnState::from_code(&wire.estado)
            .ok_or_else(|| Error::Malformed(format!("unknown state {:?}", wire.estado)))?;

        let priority = if wire.es_preferencial.unwrap_or(false) {
            let reason = wire
                .motivo_preferencial
                .as_deref()
                .and_then(PriorityReason::from_code);
            Some(reason.unwrap_or_else(|| {
                warn!(turn = %number, "priority turn without a reason");
                PriorityReason::Unspecified
            }))
        } else {
            None
        };

        let appointment_time = wire.hora_cita.as_deref().and_then(parse_time);
        let appointment = wire.cita.map(Appointment::from).map(|mut a| {
            if a.time.is_none() {
                a.time = appointment_time;
            }
            a
        });

        Ok(Turn {
            number: number.into(),
            module,
            state,
            assigned_at: wire.hora_asignacion.as_deref().and_then(parse_timestamp),
            priority,
            operator_role: wire.tipo_operador.as_deref().and_then(OperatorRole::from_code),
            patient_name: wire.nombre_paciente,
            patient: wire.paciente.map(Patient::from),
            appointment,
            site: wire.sede,
        })
    }
}

impl From<WirePatient> for Patient {
    fn from(wire: WirePatient) -> Self {
        let document = match (wire.tipo_id.as_deref(), wire.id_paciente.as_deref()) {
            (Some(kind), Some(number)) => DocumentType::from_code(kind)
                .and_then(|kind| Document::new(kind, number).ok()),
            _ => None,
        };
        Patient {
            reference: wire.numero_paciente,
            document,
            first_name: wire.nombre1,
            middle_name: wire.nombre2,
            first_surname: wire.apellido1,
            second_surname: wire.apellido2,
            phone: wire.telefono,
            birth_date: wire.fecha_nacimiento.as_deref().and_then(parse_date),
        }
    }
}

impl From<WireAppointment> for Appointment {
    fn from(wire: WireAppointment) -> Self {
        Appointment {
            id: wire.id_cita,
            date: wire.fecha_cita.as_deref().and_then(parse_date),
            time: wire.hora_cita.as_deref().and_then(parse_time),
            procedure: wire.procedimiento,
            status: wire.estado.and_then(AppointmentStatus::from_code),
            doctor_id: wire.id_medico,
        }
    }
}

/// Decode a listing, dropping entries that cannot be understood.
pub fn decode_listing(entries: Vec<serde_json::Value>) -> Vec<Turn> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let decoded = serde_json::from_value::<WireTurn>(entry)
                .map_err(Error::from)
                .and_then(Turn::try_from);
            match decoded {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable turn from listing");
                    None
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// RFC 3339 when an offset is present, otherwise facility-local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

/// Accepts a bare date or the date part of a timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(deserializer).map(|value| value.map(String::from))
}
