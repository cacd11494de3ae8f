//! Ticket rendering and the delivery cascade.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use digiturno::backend::memory::PRINT_TICKET;
use digiturno::backend::{InMemoryBackend, PrintPayload};
use digiturno::config::{PrinterConfig, TicketConfig};
use digiturno::error::Error;
use digiturno::model::*;
use digiturno::ticket::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn printed_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 1)
        .unwrap()
        .and_hms_opt(14, 5, 0)
        .unwrap()
}

fn renderer(width: usize) -> TicketRenderer {
    TicketRenderer::new(&TicketConfig {
        facility_name: "NEURODX".to_string(),
        facility_tagline: "Su diagnóstico, nuestro compromiso".to_string(),
        width,
    })
}

fn billing_turn(number: &str) -> Turn {
    Turn::new(number, Module::Billing, Utc::now())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[test]
fn renders_every_field_of_a_priority_ticket() {
    let turn = Turn::new("P003", Module::Preferential, Utc::now())
        .with_priority(PriorityReason::Pregnancy)
        .with_patient_name("María López");
    let ticket = renderer(40).render(&turn, None, printed_at());

    for expected in [
        "NEURODX",
        "Su diagnóstico, nuestro compromiso",
        "TURNO PREFERENCIAL",
        "TURNO P003",
        "* TURNO PREFERENCIAL *",
        "(Embarazo)",
        "María López",
        "01/03/2025 - 14:05",
        "Por favor espere el llamado en pantalla",
    ] {
        assert!(ticket.text.contains(expected), "text is missing {expected:?}");
        assert!(
            ticket.structured.contains(expected),
            "html is missing {expected:?}"
        );
    }
    assert!(ticket.text.ends_with('\n'));
    assert!(ticket.structured.starts_with("<!DOCTYPE html>"));
    assert!(ticket.structured.contains("<title>Turno P003</title>"));
}

#[test]
fn optional_fields_leave_no_blank_placeholders() {
    let ticket = renderer(40).render(&billing_turn("F001"), None, printed_at());
    assert!(!ticket.text.contains("PREFERENCIAL"));
    assert!(!ticket.structured.contains("class=\"patient\""));
    assert!(!ticket.structured.contains("class=\"priority\""));
    assert!(!ticket.text.contains("\n\n\n"));
    assert!(!ticket.text.contains("None"));
}

#[test]
fn unspecified_reason_prints_marker_without_reason_line() {
    let turn = Turn::new("P1", Module::Preferential, Utc::now())
        .with_priority(PriorityReason::Unspecified);
    let ticket = renderer(40).render(&turn, None, printed_at());
    assert!(ticket.text.contains("* TURNO PREFERENCIAL *"));
    assert!(!ticket.text.contains('('));
    assert!(!ticket.structured.contains("class=\"reason\""));
}

#[test]
fn module_override_replaces_label() {
    let turn = Turn::new("A004", Module::AppointmentAssignment, Utc::now());
    let ticket = renderer(40).render(&turn, Some(Module::Billing), printed_at());
    assert!(ticket.text.contains("FACTURACIÓN"));
    assert!(!ticket.text.contains("ASIGNACIÓN DE CITAS"));
}

#[test]
fn html_escapes_backend_supplied_text() {
    let turn = billing_turn("F<1>").with_patient_name("<b>O'Neil & \"Co\"</b>");
    let ticket = renderer(40).render(&turn, None, printed_at());
    assert!(ticket
        .structured
        .contains("&lt;b&gt;O&#39;Neil &amp; &quot;Co&quot;&lt;/b&gt;"));
    assert!(ticket.structured.contains("TURNO F&lt;1&gt;"));
    assert!(!ticket.structured.contains("<b>"));
    // The text encoding is printed raw.
    assert!(ticket.text.contains("<b>O'Neil"));
}

#[test]
fn text_lines_are_centered_and_wrapped_to_width() {
    let turn = billing_turn("7").with_patient_name("Nombre Extremadamente Largo Del Paciente");
    let ticket = renderer(20).render(&turn, None, printed_at());
    let lines: Vec<&str> = ticket.text.lines().collect();

    assert!(lines.iter().all(|line| line.chars().count() <= 20));
    assert!(lines.contains(&"      TURNO 7"));
    assert!(lines.contains(&"-".repeat(20).as_str()));
    assert!(lines.iter().any(|line| line.trim() == "Nombre Extremadamente"));
}

#[test]
fn width_has_a_floor() {
    let ticket = renderer(3).render(&billing_turn("1"), None, printed_at());
    assert!(ticket.text.contains(&"-".repeat(16)));
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Stage that answers with a fixed result and logs its turn in a shared
/// journal.
struct ScriptedStage {
    name: String,
    succeed: bool,
    calls: AtomicUsize,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedStage {
    fn new(name: &str, succeed: bool, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            succeed,
            calls: AtomicUsize::new(0),
            journal: Arc::clone(journal),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryStage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::RemoteStructured
    }

    async fn attempt(&self, turn: &Turn, artifact: &TicketArtifact) -> bool {
        assert!(artifact.text.contains(turn.number.as_str()));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push(self.name.clone());
        self.succeed
    }
}

#[tokio::test]
async fn cascade_stops_at_first_success() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let first = ScriptedStage::new("first", false, &journal);
    let second = ScriptedStage::new("second", true, &journal);
    let third = ScriptedStage::new("third", true, &journal);
    let pipeline = TicketPipeline::new(
        renderer(40),
        vec![
            first.clone() as Arc<dyn DeliveryStage>,
            second.clone(),
            third.clone(),
        ],
    );

    let outcome = pipeline.deliver(&billing_turn("F010"), None).await;
    assert!(outcome.success);
    assert_eq!(outcome.stage.as_deref(), Some("second"));
    assert_eq!(outcome.attempts, 2);
    assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
}

#[tokio::test]
async fn cascade_exhausts_every_stage_in_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let stages: Vec<Arc<dyn DeliveryStage>> = ["a", "b", "c"]
        .into_iter()
        .map(|name| ScriptedStage::new(name, false, &journal) as Arc<dyn DeliveryStage>)
        .collect();
    let pipeline = TicketPipeline::new(renderer(40), stages);
    assert_eq!(pipeline.stages().collect::<Vec<_>>(), vec!["a", "b", "c"]);

    let outcome = pipeline.deliver(&billing_turn("F011"), None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.stage, None);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(*journal.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn every_delivery_gets_its_own_id() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = TicketPipeline::new(
        renderer(40),
        vec![ScriptedStage::new("only", true, &journal) as Arc<dyn DeliveryStage>],
    );
    let turn = billing_turn("F012");
    let a = pipeline.deliver(&turn, None).await;
    let b = pipeline.deliver(&turn, None).await;
    assert_ne!(a.delivery_id, b.delivery_id);
}

#[tokio::test]
async fn standard_pipeline_falls_through_to_remote_sink() {
    let backend = Arc::new(InMemoryBackend::new());
    let pipeline = TicketPipeline::standard(renderer(40), &PrinterConfig::default(), backend.clone());
    assert_eq!(
        pipeline.stages().collect::<Vec<_>>(),
        vec!["local", "remote", "remote_plain"]
    );

    let outcome = pipeline.deliver(&billing_turn("F020"), None).await;
    assert_eq!(outcome.stage.as_deref(), Some("remote"));
    assert_eq!(outcome.attempts, 2);

    let printed = backend.printed();
    assert_eq!(printed.len(), 1);
    assert_eq!(printed[0].0.as_str(), "F020");
    match &printed[0].1 {
        PrintPayload::Structured { structured, plain } => {
            assert!(structured.starts_with("<!DOCTYPE html>"));
            assert!(plain.contains("TURNO F020"));
        }
        other => panic!("expected structured payload, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_failure_falls_back_to_plain_text() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_next(PRINT_TICKET, Error::Unavailable("printer offline".to_string()));
    let pipeline = TicketPipeline::standard(renderer(40), &PrinterConfig::default(), backend.clone());

    let outcome = pipeline.deliver(&billing_turn("F021"), None).await;
    assert!(outcome.success);
    assert_eq!(outcome.stage.as_deref(), Some("remote_plain"));
    assert_eq!(outcome.attempts, 3);

    let printed = backend.printed();
    assert_eq!(printed.len(), 1);
    assert!(matches!(&printed[0].1, PrintPayload::PlainOnly { plain } if plain.contains("F021")));
}

// ---------------------------------------------------------------------------
// Local surface
// ---------------------------------------------------------------------------

fn local_stage(command: Option<&str>, spool: &std::path::Path) -> LocalSurfaceStage {
    LocalSurfaceStage::new(&PrinterConfig {
        command: command.map(str::to_string),
        spool_dir: spool.to_path_buf(),
        confirm_delay: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn local_stage_without_command_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    let turn = billing_turn("F030");
    let artifact = renderer(40).render(&turn, None, printed_at());

    assert!(!local_stage(None, &spool).attempt(&turn, &artifact).await);
    assert!(!spool.exists());
}

fn spooled(dir: &std::path::Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[cfg(unix)]
#[tokio::test]
async fn local_stage_confirms_on_clean_exit_and_clears_spool() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    let stage = local_stage(Some("true"), &spool);
    let renderer = renderer(40);

    for number in ["F031", "F032", "F033"] {
        let turn = billing_turn(number);
        let artifact = renderer.render(&turn, None, printed_at());
        assert!(stage.attempt(&turn, &artifact).await);
    }
    assert!(spool.exists());
    assert!(spooled(&spool).is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn local_stage_hands_spooled_ticket_to_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    let seen = dir.path().join("seen");
    let command = format!("cp -t {}", seen.display());
    std::fs::create_dir_all(&seen).unwrap();

    let turn = billing_turn("F034");
    let artifact = renderer(40).render(&turn, None, printed_at());
    assert!(local_stage(Some(&command), &spool).attempt(&turn, &artifact).await);

    let copied = spooled(&seen);
    assert_eq!(copied.len(), 1);
    assert!(copied[0].starts_with("F034-") && copied[0].ends_with(".html"));
    assert!(spooled(&spool).is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn local_stage_keeps_unsafe_numbers_inside_spool() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a");
    let spool = root.join("spool");
    let seen = dir.path().join("seen");
    std::fs::create_dir_all(&seen).unwrap();
    let stage = local_stage(Some(&format!("cp -t {}", seen.display())), &spool);
    let renderer = renderer(40);

    for number in ["../../escaped", "F/2"] {
        let turn = billing_turn(number);
        let artifact = renderer.render(&turn, None, printed_at());
        assert!(stage.attempt(&turn, &artifact).await, "{number} not delivered");
    }

    assert_eq!(spooled(dir.path()), vec!["a", "seen"]);
    assert_eq!(spooled(&root), vec!["spool"]);
    let copied = spooled(&seen);
    assert_eq!(copied.len(), 2);
    assert!(copied[0].starts_with("F2-"));
    assert!(copied[1].starts_with("escaped-"));
}

#[cfg(unix)]
#[tokio::test]
async fn local_stage_reports_failing_command() {
    let dir = tempfile::tempdir().unwrap();
    let turn = billing_turn("F032");
    let artifact = renderer(40).render(&turn, None, printed_at());
    let stage = local_stage(Some("false"), dir.path());
    assert!(!stage.attempt(&turn, &artifact).await);
    assert_eq!(stage.name(), "local");
    assert_eq!(stage.capability(), Capability::LocalSurface);
}
