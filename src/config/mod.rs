//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The backend token is wrapped in secrecy::SecretString to
//! prevent log leaks.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub backend_url: String,
    pub backend_token: Option<SecretString>,
    /// Session-selected sede, passed through to the backend untouched.
    pub site: Option<String>,
    pub request_timeout: Duration,
    /// How long the kiosk shows a successful assignment before resetting.
    pub kiosk_dwell: Duration,
    pub printer: PrinterConfig,
    pub ticket: TicketConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Local print surface settings.
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Command line the local stage runs; the spooled ticket path is
    /// appended as the last argument. `None` disables the local stage.
    pub command: Option<String>,
    pub spool_dir: PathBuf,
    /// Delay before the local attempt is checked for completion.
    pub confirm_delay: Duration,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            command: None,
            spool_dir: PathBuf::from("/tmp/digiturno-spool"),
            confirm_delay: Duration::from_millis(1500),
        }
    }
}

/// Ticket branding and layout.
#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub facility_name: String,
    pub facility_tagline: String,
    /// Columns of the fixed-width text encoding.
    pub width: usize,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            facility_name: "NEURODX".to_string(),
            facility_tagline: "Su diagnóstico, nuestro compromiso".to_string(),
            width: 40,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let printer_defaults = PrinterConfig::default();
        let ticket_defaults = TicketConfig::default();

        Ok(Self {
            backend_url: required_var("BACKEND_URL")?
                .trim_end_matches('/')
                .to_string(),
            backend_token: optional_var("BACKEND_TOKEN").map(SecretString::from),
            site: optional_var("SITE"),
            request_timeout: Duration::from_millis(parsed_var("REQUEST_TIMEOUT_MS", 10_000)?),
            kiosk_dwell: Duration::from_secs(parsed_var("KIOSK_DWELL_SECS", 5)?),
            printer: PrinterConfig {
                command: optional_var("PRINT_COMMAND"),
                spool_dir: optional_var("PRINT_SPOOL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(printer_defaults.spool_dir),
                confirm_delay: Duration::from_millis(parsed_var("PRINT_CONFIRM_MS", 1500)?),
            },
            ticket: TicketConfig {
                facility_name: optional_var("FACILITY_NAME")
                    .unwrap_or(ticket_defaults.facility_name),
                facility_tagline: optional_var("FACILITY_TAGLINE")
                    .unwrap_or(ticket_defaults.facility_tagline),
                width: parsed_var("TICKET_WIDTH", ticket_defaults.width)?,
            },
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and blank values are both treated as absent.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("environment variable {name} is invalid: {raw}"))),
    }
}
