//! Error types for digiturno.
//!
//! Every variant belongs to one [`ErrorClass`]; callers branch on the class
//! rather than on individual variants.

use thiserror::Error;

use crate::model::TurnState;

#[derive(Debug, Error)]
pub enum Error {
    /// Timeout, connectivity failure or 5xx from the backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend understood the request and refused it.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("no flow is mapped for service {service} with priority subtype {subtype}")]
    UnmappedFlow { service: String, subtype: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TurnState, to: TurnState },

    #[error("invalid wizard action: {0}")]
    InvalidStep(String),

    #[error("malformed backend payload: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by display surfaces and the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Keep the last good state and try again on the next tick.
    Transient,
    /// Show the user a specific message; never retried automatically.
    Business,
    /// A missing mapping or bad configuration. Halts the attempt.
    Configuration,
    Internal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Unavailable(_) => ErrorClass::Transient,
            Error::NotFound(_) | Error::Rejected(_) => ErrorClass::Business,
            Error::UnmappedFlow { .. } | Error::Config(_) => ErrorClass::Configuration,
            Error::InvalidTransition { .. }
            | Error::InvalidStep(_)
            | Error::Malformed(_)
            | Error::Io(_)
            | Error::Other(_) => ErrorClass::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Error::Unavailable(format!("request timed out: {error}"))
        } else if error.is_connect() || error.is_request() {
            Error::Unavailable(format!("cannot reach backend: {error}"))
        } else if error.is_decode() {
            Error::Malformed(error.to_string())
        } else if let Some(status) = error.status() {
            if status.is_server_error() {
                Error::Unavailable(format!("backend returned HTTP {status}"))
            } else {
                Error::Rejected(format!("backend returned HTTP {status}"))
            }
        } else {
            Error::Other(error.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Malformed(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
