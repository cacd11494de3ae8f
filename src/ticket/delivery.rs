//! The delivery cascade: an ordered list of stages tried until one
//! reports success.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use opentelemetry::KeyValue;
use tokio::process::Command;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::render::{TicketArtifact, TicketRenderer};
use crate::backend::{Backend, PrintPayload};
use crate::config::PrinterConfig;
use crate::error::Result;
use crate::model::{Module, Turn};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_delivery, ticket_deliver_span};

/// What kind of target a stage prints to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// A print surface on this machine.
    LocalSurface,
    /// The backend's print service with the styled encoding.
    RemoteStructured,
    /// The backend's print service with plain text only.
    RemotePlain,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::LocalSurface => "local_surface",
            Capability::RemoteStructured => "remote_structured",
            Capability::RemotePlain => "remote_plain",
        }
    }
}

/// One delivery target. `attempt` returns `true` only when output is
/// confirmed.
#[async_trait]
pub trait DeliveryStage: Send + Sync {
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    async fn attempt(&self, turn: &Turn, artifact: &TicketArtifact) -> bool;
}

// ---------------------------------------------------------------------------
// Local surface
// ---------------------------------------------------------------------------

/// Spools the ticket to disk and hands it to a local print command.
///
/// The command gets the HTML path as its last argument and the text path in
/// `DIGITURNO_TICKET_TEXT`. Success means it exited 0 within the confirm
/// delay; a command still running by then is left alone and reported as
/// unconfirmed. Spooled files are removed once the command exits.
pub struct LocalSurfaceStage {
    command: Option<String>,
    spool_dir: PathBuf,
    confirm_delay: Duration,
}

impl LocalSurfaceStage {
    pub fn new(config: &PrinterConfig) -> Self {
        Self {
            command: config.command.clone(),
            spool_dir: config.spool_dir.clone(),
            confirm_delay: config.confirm_delay,
        }
    }

    async fn spool(&self, turn: &Turn, artifact: &TicketArtifact) -> Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let stem = format!("{}-{}", spool_stem(turn.number.as_str()), Uuid::new_v4());
        let html = self.spool_dir.join(format!("{stem}.html"));
        let text = self.spool_dir.join(format!("{stem}.txt"));
        let written = async {
            tokio::fs::write(&html, &artifact.structured).await?;
            tokio::fs::write(&text, &artifact.text).await
        }
        .await;
        if let Err(e) = written {
            discard_spool(&html, &text).await;
            return Err(e.into());
        }
        Ok((html, text))
    }
}

/// File-name-safe form of a turn number.
fn spool_stem(number: &str) -> String {
    let stem: String = number
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() {
        "ticket".to_string()
    } else {
        stem
    }
}

async fn discard_spool(html: &Path, text: &Path) {
    for path in [html, text] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "cannot remove spooled ticket");
        }
    }
}

#[async_trait]
impl DeliveryStage for LocalSurfaceStage {
    fn name(&self) -> &str {
        "local"
    }

    fn capability(&self) -> Capability {
        Capability::LocalSurface
    }

    async fn attempt(&self, turn: &Turn, artifact: &TicketArtifact) -> bool {
        let Some(command_line) = self.command.as_deref() else {
            debug!(turn = %turn.number, "no local print command configured");
            return false;
        };
        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            return false;
        };

        let (html, text) = match self.spool(turn, artifact).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(turn = %turn.number, error = %e, "cannot spool ticket");
                return false;
            }
        };

        debug!(turn = %turn.number, command = command_line, path = %html.display(), "running print command");
        let mut child = match Command::new(program)
            .args(parts)
            .arg(&html)
            .env("DIGITURNO_TURN", turn.number.as_str())
            .env("DIGITURNO_TICKET_TEXT", &text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(turn = %turn.number, error = %e, "cannot start print command");
                discard_spool(&html, &text).await;
                return false;
            }
        };

        let waited = tokio::time::timeout(self.confirm_delay, child.wait()).await;
        if waited.is_ok() {
            discard_spool(&html, &text).await;
        } else {
            tokio::spawn(async move {
                let _ = child.wait().await;
                discard_spool(&html, &text).await;
            });
        }

        match waited {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                warn!(
                    turn = %turn.number,
                    code = status.code().unwrap_or(-1),
                    "print command failed"
                );
                false
            }
            Ok(Err(e)) => {
                warn!(turn = %turn.number, error = %e, "print command wait failed");
                false
            }
            Err(_) => {
                info!(turn = %turn.number, "print command still running, treating as unconfirmed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Remote sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Styled encoding with the plain text as fallback payload.
    Structured,
    /// Plain text only.
    PlainOnly,
}

/// The backend's thermal-printer service.
pub struct RemoteSinkStage {
    backend: Arc<dyn Backend>,
    mode: RemoteMode,
}

impl RemoteSinkStage {
    pub fn new(backend: Arc<dyn Backend>, mode: RemoteMode) -> Self {
        Self { backend, mode }
    }
}

#[async_trait]
impl DeliveryStage for RemoteSinkStage {
    fn name(&self) -> &str {
        match self.mode {
            RemoteMode::Structured => "remote",
            RemoteMode::PlainOnly => "remote_plain",
        }
    }

    fn capability(&self) -> Capability {
        match self.mode {
            RemoteMode::Structured => Capability::RemoteStructured,
            RemoteMode::PlainOnly => Capability::RemotePlain,
        }
    }

    async fn attempt(&self, turn: &Turn, artifact: &TicketArtifact) -> bool {
        let payload = match self.mode {
            RemoteMode::Structured => PrintPayload::Structured {
                structured: artifact.structured.clone(),
                plain: artifact.text.clone(),
            },
            RemoteMode::PlainOnly => PrintPayload::PlainOnly {
                plain: artifact.text.clone(),
            },
        };
        match self.backend.print_ticket(&turn.number, &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(turn = %turn.number, stage = self.name(), error = %e, "remote print failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Name of the stage that printed the ticket.
    pub stage: Option<String>,
    /// Stages tried, including the successful one.
    pub attempts: usize,
    pub delivery_id: Uuid,
}

/// Renders a ticket and walks the stages in order, stopping at the first
/// success. Holds no state between calls.
pub struct TicketPipeline {
    renderer: TicketRenderer,
    stages: Vec<Arc<dyn DeliveryStage>>,
}

impl TicketPipeline {
    pub fn new(renderer: TicketRenderer, stages: Vec<Arc<dyn DeliveryStage>>) -> Self {
        Self { renderer, stages }
    }

    /// Local surface, then the remote sink, then the remote sink with plain
    /// text only.
    pub fn standard(
        renderer: TicketRenderer,
        printer: &PrinterConfig,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self::new(
            renderer,
            vec![
                Arc::new(LocalSurfaceStage::new(printer)),
                Arc::new(RemoteSinkStage::new(Arc::clone(&backend), RemoteMode::Structured)),
                Arc::new(RemoteSinkStage::new(backend, RemoteMode::PlainOnly)),
            ],
        )
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name())
    }

    pub async fn deliver(&self, turn: &Turn, module_override: Option<Module>) -> DeliveryOutcome {
        let delivery_id = Uuid::new_v4();
        let span = ticket_deliver_span(turn.number.as_str(), &delivery_id);
        let artifact = self
            .renderer
            .render(turn, module_override, Local::now().naive_local());

        async {
            let mut attempts = 0;
            for stage in &self.stages {
                attempts += 1;
                let ok = stage.attempt(turn, &artifact).await;
                metrics::ticket_attempts().add(
                    1,
                    &[
                        KeyValue::new("stage", stage.name().to_string()),
                        KeyValue::new("result", if ok { "ok" } else { "failed" }),
                    ],
                );
                info!(
                    turn = %turn.number,
                    %delivery_id,
                    stage = stage.name(),
                    capability = stage.capability().as_str(),
                    attempt = attempts,
                    success = ok,
                    "ticket delivery attempt"
                );
                if ok {
                    record_delivery(&tracing::Span::current(), Some(stage.name()), attempts);
                    return DeliveryOutcome {
                        success: true,
                        stage: Some(stage.name().to_string()),
                        attempts,
                        delivery_id,
                    };
                }
            }

            record_delivery(&tracing::Span::current(), None, attempts);
            warn!(turn = %turn.number, %delivery_id, attempts, "ticket delivery exhausted");
            DeliveryOutcome {
                success: false,
                stage: None,
                attempts,
                delivery_id,
            }
        }
        .instrument(span)
        .await
    }
}
