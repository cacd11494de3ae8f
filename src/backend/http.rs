//! REST client for the turn backend.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::wire::{
    AckEnvelope, BillingAssignRequest, DocumentAssignRequest, DocumentTypesEnvelope,
    ListingEnvelope, PriorityReasonsEnvelope, PrintRequest, SearchEnvelope, SearchRequest,
    StatisticsEnvelope, TurnEnvelope, decode_listing,
};
use super::{Backend, BillingTurnRequest, PatientSearch, PrintPayload, Statistics};
use crate::config::Config;
use crate::config::secrets::bearer;
use crate::error::{Error, Result};
use crate::model::{
    Appointment, Document, DocumentType, Lane, Module, OperatorRole, Patient, PriorityReason,
    Turn, TurnNumber,
};
use crate::telemetry::metrics;

/// Header carrying the session-selected sede.
const SITE_HEADER: &str = "X-Sede";

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub token: Option<SecretString>,
    pub site: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            token: None,
            site: None,
        }
    }
}

pub struct HttpBackend {
    base_url: String,
    site: Option<String>,
    client: reqwest::Client,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("site", &self.site)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, options: HttpOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &options.token {
            let mut value = HeaderValue::from_str(&bearer(token))
                .map_err(|_| Error::Config("backend token is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(site) = &options.site {
            let value = HeaderValue::from_str(site)
                .map_err(|_| Error::Config(format!("site {site:?} is not a valid header value")))?;
            headers.insert(SITE_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("digiturno/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to initialize HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site: options.site,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.backend_url.clone(),
            HttpOptions {
                timeout: config.request_timeout,
                token: config.backend_token.clone(),
                site: config.site.clone(),
            },
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, operation: &'static str, path: &str) -> Result<T> {
        self.execute(operation, self.client.get(self.url(path)))
            .await
    }

    async fn post<B, T>(&self, operation: &'static str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(operation, self.client.post(self.url(path)).json(body))
            .await
    }

    async fn post_empty<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<T> {
        self.execute(operation, self.client.post(self.url(path)))
            .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let started = Instant::now();
        let result = send_and_decode(request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::backend_request_duration_ms().record(
            elapsed_ms,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );
        if let Err(ref e) = result {
            debug!(operation, error = %e, elapsed_ms, "backend request failed");
        }
        result
    }

    async fn acknowledge(&self, operation: &'static str, path: &str) -> Result<()> {
        let ack: AckEnvelope = self.post_empty(operation, path).await?;
        if ack.success == Some(false) {
            return Err(Error::Rejected(
                ack.message().unwrap_or("operation refused").to_string(),
            ));
        }
        Ok(())
    }
}

async fn send_and_decode<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str(&body)?);
    }

    let message = serde_json::from_str::<AckEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.message().map(str::to_string))
        .unwrap_or_else(|| truncate_for_error(&body));
    let message = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        message
    };

    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        s if s.is_server_error() => Error::Unavailable(format!("HTTP {s}: {message}")),
        _ => Error::Rejected(message),
    })
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    let body = body.trim();
    if body.chars().count() <= MAX_LEN {
        return body.to_string();
    }
    let mut truncated = body.chars().take(MAX_LEN).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn issued_turn(envelope: TurnEnvelope) -> Result<Turn> {
    if envelope.success == Some(false) {
        return Err(Error::Rejected(
            envelope
                .mensaje
                .unwrap_or_else(|| "turn could not be assigned".to_string()),
        ));
    }
    let wire = envelope
        .turno
        .ok_or_else(|| Error::Malformed("assignment response without a turn".to_string()))?;
    Turn::try_from(wire)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn search_patient(&self, document: &Document) -> Result<PatientSearch> {
        let envelope: SearchEnvelope = match self
            .post("search_patient", "/buscar-paciente", &SearchRequest::new(document))
            .await
        {
            Ok(envelope) => envelope,
            Err(Error::NotFound(_)) => return Ok(PatientSearch::default()),
            Err(e) => return Err(e),
        };
        if envelope.success == Some(false) || envelope.paciente.is_none() {
            debug!(document = %document, message = ?envelope.mensaje, "patient not found");
            return Ok(PatientSearch::default());
        }
        Ok(PatientSearch {
            patient: envelope.paciente.map(Patient::from),
            appointments: envelope.citas.into_iter().map(Appointment::from).collect(),
        })
    }

    async fn assign_billing_turn(&self, request: &BillingTurnRequest) -> Result<Turn> {
        let module = if request.priority.is_some() {
            Module::Preferential
        } else {
            Module::Billing
        };
        let body = BillingAssignRequest {
            numero_paciente: request.patient_ref,
            id_cita: request.appointment_ref,
            modulo: module.code(),
            es_preferencial: request.priority.is_some(),
            motivo_preferencial: request.priority.as_ref().map(PriorityReason::code),
            tipo_operador_override: OperatorRole::BillingClerk.code(),
        };
        let envelope = self
            .post("assign_billing_turn", "/asignar-turno-facturacion", &body)
            .await?;
        issued_turn(envelope)
    }

    async fn assign_appointment_turn(
        &self,
        document: &Document,
        display_name: Option<&str>,
    ) -> Result<Turn> {
        let body = DocumentAssignRequest::new(document, display_name, None);
        let envelope = self
            .post(
                "assign_appointment_turn",
                "/asignar-turno-asignacion-cita",
                &body,
            )
            .await?;
        issued_turn(envelope)
    }

    async fn assign_priority_turn(
        &self,
        document: &Document,
        reason: &PriorityReason,
        display_name: Option<&str>,
    ) -> Result<Turn> {
        let body = DocumentAssignRequest::new(document, display_name, Some(reason));
        let envelope = self
            .post("assign_priority_turn", "/asignar-turno-preferencial", &body)
            .await?;
        issued_turn(envelope)
    }

    async fn list_active_turns(&self, lane: Option<Lane>) -> Result<Vec<Turn>> {
        let path = match lane {
            None => "/turnos-activos",
            Some(Lane::Billing) => "/turnos-facturacion",
            Some(Lane::Appointments) => "/turnos-asignacion-cita",
        };
        let envelope: ListingEnvelope = self.get("list_active_turns", path).await?;
        if envelope.success == Some(false) {
            return Err(Error::Rejected(
                envelope
                    .mensaje
                    .unwrap_or_else(|| "listing refused".to_string()),
            ));
        }
        Ok(decode_listing(envelope.turnos))
    }

    async fn call_turn(&self, number: &TurnNumber) -> Result<()> {
        self.acknowledge("call_turn", &format!("/llamar-turno/{number}"))
            .await
    }

    async fn complete_turn(&self, number: &TurnNumber) -> Result<()> {
        self.acknowledge("complete_turn", &format!("/finalizar-turno/{number}"))
            .await
    }

    // The backend has no dedicated cancel endpoint; finishing an uncalled
    // turn withdraws it.
    async fn cancel_turn(&self, number: &TurnNumber) -> Result<()> {
        self.acknowledge("cancel_turn", &format!("/finalizar-turno/{number}"))
            .await
    }

    async fn print_ticket(&self, number: &TurnNumber, payload: &PrintPayload) -> Result<()> {
        let body = match payload {
            PrintPayload::Structured { structured, plain } => PrintRequest {
                numero_turno: number.as_str(),
                ticket_content: structured,
                ticket_content_plain: Some(plain.as_str()),
                ticket_format: "html",
            },
            PrintPayload::PlainOnly { plain } => PrintRequest {
                numero_turno: number.as_str(),
                ticket_content: plain,
                ticket_content_plain: None,
                ticket_format: "text",
            },
        };
        let ack: AckEnvelope = self
            .post("print_ticket", "/printer/print-ticket-custom", &body)
            .await?;
        if ack.success != Some(true) {
            return Err(Error::Rejected(
                ack.message().unwrap_or("print service refused the ticket").to_string(),
            ));
        }
        Ok(())
    }

    async fn document_types(&self) -> Result<Vec<DocumentType>> {
        let envelope: DocumentTypesEnvelope =
            self.get("document_types", "/tipos-documento").await?;
        Ok(envelope
            .tipos
            .iter()
            .filter_map(|item| DocumentType::from_code(item.code()))
            .collect())
    }

    async fn priority_reasons(&self) -> Result<Vec<PriorityReason>> {
        let envelope: PriorityReasonsEnvelope = self
            .get("priority_reasons", "/motivos-preferenciales")
            .await?;
        Ok(envelope
            .motivos
            .iter()
            .filter_map(|item| PriorityReason::from_code(item.code()))
            .collect())
    }

    async fn statistics(&self) -> Result<Statistics> {
        let envelope: StatisticsEnvelope = self.get("statistics", "/estadisticas").await?;
        Ok(envelope.estadisticas.into())
    }
}
