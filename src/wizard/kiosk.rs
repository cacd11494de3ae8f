//! Async driver that runs a [`Wizard`] against the backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{Instrument, info, warn};

use super::{PendingSubmission, Step, Submission, Wizard};
use crate::backend::{Backend, document_types_or_default, priority_reasons_or_default};
use crate::error::{Error, Result};
use crate::model::{DocumentType, PriorityReason, Turn};
use crate::telemetry::metrics;
use crate::telemetry::spans::turn_assign_span;
use crate::ticket::TicketPipeline;

/// The kiosk: one wizard, its backend, and its printer.
///
/// On a successful submit the ticket is delivered in the background and a
/// fire-once dwell timer returns the wizard to the first screen. Both tasks
/// are bound to the session they started in and do nothing once the wizard
/// has moved on.
pub struct Kiosk {
    backend: Arc<dyn Backend>,
    pipeline: Arc<TicketPipeline>,
    wizard: Arc<Mutex<Wizard>>,
    dwell: Duration,
}

impl Kiosk {
    pub fn new(backend: Arc<dyn Backend>, pipeline: Arc<TicketPipeline>, dwell: Duration) -> Self {
        Self {
            backend,
            pipeline,
            wizard: Arc::new(Mutex::new(Wizard::new())),
            dwell,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Wizard> {
        lock_wizard(&self.wizard)
    }

    /// Apply a synchronous wizard action.
    pub fn update<R>(&self, action: impl FnOnce(&mut Wizard) -> Result<R>) -> Result<R> {
        action(&mut self.lock())
    }

    /// A copy of the wizard as it is now.
    pub fn state(&self) -> Wizard {
        self.lock().clone()
    }

    pub fn step(&self) -> Step {
        self.lock().step()
    }

    /// Abandon the current session.
    pub fn reset(&self) {
        self.lock().reset();
    }

    pub async fn document_types(&self) -> Vec<DocumentType> {
        document_types_or_default(self.backend.as_ref()).await
    }

    pub async fn priority_reasons(&self) -> Vec<PriorityReason> {
        priority_reasons_or_default(self.backend.as_ref()).await
    }

    /// Look the patient up for a billing-linked flow. On failure the wizard
    /// stays on document entry with a notice.
    pub async fn search(&self) -> Result<()> {
        let (session, document) = self.lock().begin_search()?;
        let result = self.backend.search_patient(&document).await;
        if let Err(ref e) = result {
            warn!(document = %document, error = %e, "patient search failed");
        }
        self.lock().finish_search(session, result)
    }

    /// Submit the wizard. Returns the issued turn; ticket delivery and the
    /// dwell reset continue in the background.
    pub async fn submit(&self) -> Result<Turn> {
        let pending = self.lock().begin_submit()?;
        let span = turn_assign_span(&pending.service.to_string(), pending.session);

        let result = self.call_backend(&pending.submission).instrument(span.clone()).await;
        if let Ok(ref turn) = result {
            span.record("turn.number", turn.number.as_str());
        }
        self.lock().finish_submit(pending.session, &result);

        let turn = match result {
            Ok(turn) => turn,
            Err(e) => {
                warn!(service = %pending.service, error = %e, "turn assignment failed");
                return Err(e);
            }
        };

        metrics::turns_assigned().add(
            1,
            &[
                KeyValue::new("module", turn.module.code()),
                KeyValue::new("priority", turn.is_priority().to_string()),
            ],
        );
        info!(
            turn = %turn.number,
            module = %turn.module,
            priority = turn.is_priority(),
            session = pending.session,
            "turn issued"
        );

        self.spawn_follow_ups(&pending, &turn);
        Ok(turn)
    }

    /// Advance from document entry or patient confirmation: search when the
    /// flow needs a lookup and none was made yet, otherwise submit.
    pub async fn proceed(&self) -> Result<Step> {
        let (step, flow) = {
            let wizard = self.lock();
            (wizard.step(), wizard.flow())
        };
        match step {
            Step::DocumentEntry => {
                if flow?.requires_lookup {
                    self.search().await?;
                } else {
                    self.submit().await?;
                }
            }
            Step::PatientConfirm => {
                self.submit().await?;
            }
            other => {
                return Err(Error::InvalidStep(format!(
                    "nothing to proceed with at {other:?}"
                )));
            }
        }
        Ok(self.step())
    }

    async fn call_backend(&self, submission: &Submission) -> Result<Turn> {
        match submission {
            Submission::Billing(request) => self.backend.assign_billing_turn(request).await,
            Submission::Appointment {
                document,
                display_name,
            } => {
                self.backend
                    .assign_appointment_turn(document, display_name.as_deref())
                    .await
            }
            Submission::Priority {
                document,
                reason,
                display_name,
            } => {
                self.backend
                    .assign_priority_turn(document, reason, display_name.as_deref())
                    .await
            }
        }
    }

    fn spawn_follow_ups(&self, pending: &PendingSubmission, turn: &Turn) {
        let session = pending.session;

        let pipeline = Arc::clone(&self.pipeline);
        let wizard = Arc::clone(&self.wizard);
        let ticket_turn = turn.clone();
        let module = pending.flow.ticket_module;
        tokio::spawn(async move {
            let outcome = pipeline.deliver(&ticket_turn, Some(module)).await;
            lock_wizard(&wizard).record_delivery(session, &outcome);
        });

        let wizard = Arc::clone(&self.wizard);
        let dwell = self.dwell;
        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            if lock_wizard(&wizard).expire(session) {
                info!(session, "kiosk reset after dwell");
            }
        });
    }
}

fn lock_wizard(wizard: &Mutex<Wizard>) -> MutexGuard<'_, Wizard> {
    wizard.lock().unwrap_or_else(PoisonError::into_inner)
}
