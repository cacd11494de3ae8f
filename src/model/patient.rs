//! Patient identity and appointments, as looked up from the backend.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity document kinds accepted at the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Cédula de ciudadanía.
    CC,
    /// Tarjeta de identidad.
    TI,
    /// Cédula de extranjería.
    CE,
    /// Pasaporte (kiosk code).
    PP,
    /// Pasaporte (backend catalog code).
    PA,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::CC,
        DocumentType::TI,
        DocumentType::CE,
        DocumentType::PP,
        DocumentType::PA,
    ];

    pub fn code(self) -> &'static str {
        match self {
            DocumentType::CC => "CC",
            DocumentType::TI => "TI",
            DocumentType::CE => "CE",
            DocumentType::PP => "PP",
            DocumentType::PA => "PA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(code))
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentType::CC => "Cédula de Ciudadanía",
            DocumentType::TI => "Tarjeta de Identidad",
            DocumentType::CE => "Cédula de Extranjería",
            DocumentType::PP | DocumentType::PA => "Pasaporte",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Document type + number, the key the backend searches patients by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    pub kind: DocumentType,
    pub number: String,
}

impl Document {
    pub fn new(kind: DocumentType, number: impl AsRef<str>) -> Result<Self> {
        let number = number.as_ref().trim();
        if number.is_empty() {
            return Err(Error::InvalidStep("document number is empty".to_string()));
        }
        Ok(Self {
            kind,
            number: number.to_string(),
        })
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.number)
    }
}

/// A patient record. Only used to label turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// Internal backend reference; links the patient to appointments.
    pub reference: i64,
    pub document: Option<Document>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub first_surname: Option<String>,
    pub second_surname: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

impl Patient {
    pub fn new(reference: i64) -> Self {
        Self {
            reference,
            document: None,
            first_name: None,
            middle_name: None,
            first_surname: None,
            second_surname: None,
            phone: None,
            birth_date: None,
        }
    }

    /// Given names then family names, skipping absent parts.
    pub fn full_name(&self) -> String {
        [
            &self.first_name,
            &self.middle_name,
            &self.first_surname,
            &self.second_surname,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref().map(str::trim))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// First given name and first surname, as the kiosk confirmation shows.
    pub fn short_name(&self) -> String {
        [&self.first_name, &self.first_surname]
            .into_iter()
            .filter_map(|part| part.as_deref().map(str::trim))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Status codes the backend reports for appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AppointmentStatus::Scheduled),
            1 => Some(AppointmentStatus::Confirmed),
            2 => Some(AppointmentStatus::InProgress),
            3 => Some(AppointmentStatus::Completed),
            4 => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "Programada",
            AppointmentStatus::Confirmed => "Confirmada",
            AppointmentStatus::InProgress => "En Proceso",
            AppointmentStatus::Completed => "Completada",
            AppointmentStatus::Cancelled => "Cancelada",
        }
    }
}

/// A scheduled visit a billing turn can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub procedure: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<String>,
}

impl Appointment {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            date: None,
            time: None,
            procedure: None,
            status: None,
            doctor_id: None,
        }
    }
}
