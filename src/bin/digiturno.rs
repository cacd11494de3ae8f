//! digiturno CLI: operator and kiosk interface to the turn backend.

use clap::{Parser, Subcommand, ValueEnum};
use digiturno::backend::{Backend, HttpBackend};
use digiturno::config::Config;
use digiturno::desk::OperatorDesk;
use digiturno::model::{DocumentType, Lane, Module, PriorityReason, Turn, TurnNumber};
use digiturno::surface::SurfaceRegistry;
use digiturno::sync::{SurfaceObserver, SurfaceView, SyncEngine};
use digiturno::telemetry::{TelemetryConfig, init_telemetry};
use digiturno::ticket::{TicketPipeline, TicketRenderer};
use digiturno::wizard::{DeliveryStatus, Kiosk, PrioritySubtype, Service, Step};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "digiturno", about = "Walk-in turn kiosk, boards and printer client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one display surface until Ctrl-C
    Watch {
        /// Directory containing surface TOML configs
        #[arg(long, default_value = "surfaces")]
        surfaces: PathBuf,
        /// Surface name
        #[arg(long)]
        surface: String,
    },
    /// Operator desk actions
    Turns {
        #[command(subcommand)]
        action: TurnsAction,
    },
    /// Issue a turn through the kiosk flow
    Assign {
        #[command(subcommand)]
        flow: AssignFlow,
    },
    /// Re-print the ticket of an active turn
    Print {
        number: String,
        /// Service label to print instead of the turn's own module
        #[arg(long, value_parser = parse_module)]
        module: Option<Module>,
    },
    /// Show the backend's daily statistics
    Stats,
}

#[derive(Subcommand)]
enum TurnsAction {
    /// List active turns
    List {
        #[arg(long, value_enum)]
        lane: Option<LaneArg>,
    },
    /// Call a pending turn
    Call { number: String },
    /// Mark a called turn as attended
    Complete { number: String },
    /// Withdraw a turn
    Cancel { number: String },
}

#[derive(Subcommand)]
enum AssignFlow {
    /// Billing of an existing appointment
    Billing {
        #[command(flatten)]
        document: DocumentArgs,
        /// Which of today's appointments to bill (0-based)
        #[arg(long, default_value_t = 0)]
        appointment: usize,
    },
    /// Scheduling a new appointment
    Appointment {
        #[command(flatten)]
        document: DocumentArgs,
    },
    /// Priority lane
    Priority {
        #[command(flatten)]
        document: DocumentArgs,
        #[arg(long = "for", value_enum)]
        purpose: PurposeArg,
        /// Reason code, e.g. TERCERA_EDAD, EMBARAZO, DISCAPACIDAD
        #[arg(long, value_parser = parse_reason)]
        reason: PriorityReason,
        #[arg(long, default_value_t = 0)]
        appointment: usize,
    },
}

#[derive(clap::Args)]
struct DocumentArgs {
    /// Document type (CC, TI, CE, PP, PA)
    #[arg(long = "doc-type", value_parser = parse_document_type, default_value = "CC")]
    kind: DocumentType,
    /// Document number
    #[arg(long = "doc")]
    number: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum LaneArg {
    Billing,
    Appointments,
}

impl From<LaneArg> for Lane {
    fn from(lane: LaneArg) -> Self {
        match lane {
            LaneArg::Billing => Lane::Billing,
            LaneArg::Appointments => Lane::Appointments,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PurposeArg {
    Billing,
    Appointment,
}

fn parse_document_type(raw: &str) -> Result<DocumentType, String> {
    DocumentType::from_code(raw).ok_or_else(|| format!("unknown document type {raw}"))
}

fn parse_reason(raw: &str) -> Result<PriorityReason, String> {
    PriorityReason::from_code(raw).ok_or_else(|| "priority reason is required".to_string())
}

fn parse_module(raw: &str) -> Result<Module, String> {
    Module::from_service_key(raw)
        .or_else(|| Module::from_code(raw))
        .ok_or_else(|| format!("unknown module {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "digiturno".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&config)?);

    match cli.command {
        Command::Watch { surfaces, surface } => cmd_watch(backend, surfaces, surface).await,
        Command::Turns { action } => cmd_turns(backend, action).await,
        Command::Assign { flow } => cmd_assign(&config, backend, flow).await,
        Command::Print { number, module } => cmd_print(&config, backend, number, module).await,
        Command::Stats => cmd_stats(backend).await,
    }
}

// ---------------------------------------------------------------------------
// watch
// ---------------------------------------------------------------------------

struct BoardPrinter {
    name: String,
}

impl SurfaceObserver for BoardPrinter {
    fn on_snapshot(&self, view: &SurfaceView) {
        println!("== {} ==", self.name);
        println!("EN ATENCIÓN ({})", view.called.len());
        for turn in &view.called {
            println!("  {}", board_line(turn));
        }
        println!("EN ESPERA ({})", view.pending.len());
        for turn in &view.pending {
            println!("  {}", board_line(turn));
        }
    }

    fn on_new_arrivals(&self, arrivals: &[Turn]) {
        for turn in arrivals {
            println!(
                "\x07>> TURNO {} -> {}",
                turn.number,
                turn.destination_label()
            );
        }
    }

    fn on_featured(&self, turn: &Turn) {
        println!("** TURNO {} -> {}", turn.number, turn.destination_label());
    }
}

fn board_line(turn: &Turn) -> String {
    let priority = turn
        .priority
        .as_ref()
        .map(|reason| format!(" [{}]", reason.label()))
        .unwrap_or_default();
    let wait = turn
        .assigned_at
        .map(|at| (chrono::Utc::now() - at).num_minutes())
        .unwrap_or(0);
    format!(
        "{:<8} {:<20} {:>4} min {:?}{}  {}",
        turn.number,
        turn.destination_label(),
        wait,
        turn.urgency(chrono::Utc::now()),
        priority,
        turn.display_name().unwrap_or_default()
    )
}

async fn cmd_watch(
    backend: Arc<dyn Backend>,
    surfaces: PathBuf,
    surface: String,
) -> anyhow::Result<()> {
    let registry = SurfaceRegistry::load_from_dir(&surfaces)?;
    let Some(config) = registry.get(&surface).cloned() else {
        anyhow::bail!(
            "no surface named '{surface}' (known: {})",
            registry.names().join(", ")
        );
    };

    let observer = Arc::new(BoardPrinter {
        name: config.name.clone(),
    });
    let handle = SyncEngine::new(backend, config).start(observer);

    tokio::signal::ctrl_c().await.ok();
    handle.stop();
    Ok(())
}

// ---------------------------------------------------------------------------
// turns
// ---------------------------------------------------------------------------

async fn cmd_turns(backend: Arc<dyn Backend>, action: TurnsAction) -> anyhow::Result<()> {
    match action {
        TurnsAction::List { lane } => {
            let desk = OperatorDesk::new(backend, lane.map(Lane::from));
            let mut turns = desk.queue().await?;
            turns.sort_by(digiturno::model::rank);
            if turns.is_empty() {
                println!("No active turns.");
                return Ok(());
            }
            println!(
                "{:<8}  {:<16}  {:<10}  {:<14}  {:<6}  PATIENT",
                "TURN", "MODULE", "STATE", "PRIORITY", "AT"
            );
            println!("{}", "-".repeat(80));
            for turn in &turns {
                println!(
                    "{:<8}  {:<16}  {:<10}  {:<14}  {:<6}  {}",
                    turn.number,
                    turn.module.code(),
                    turn.state,
                    turn.priority.as_ref().map(|r| r.code()).unwrap_or("-"),
                    turn.assigned_at
                        .map(|at| at.with_timezone(&chrono::Local).format("%H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    turn.display_name().unwrap_or_default()
                );
            }
            println!("\n{} turn(s)", turns.len());
            Ok(())
        }
        TurnsAction::Call { number } => {
            let desk = OperatorDesk::new(backend, None);
            let turn = find_turn(&desk, &number).await?;
            desk.call(&turn).await?;
            println!("Called: {} ({})", turn.number, turn.destination_label());
            Ok(())
        }
        TurnsAction::Complete { number } => {
            let desk = OperatorDesk::new(backend, None);
            let turn = find_turn(&desk, &number).await?;
            desk.complete(&turn).await?;
            println!("Completed: {}", turn.number);
            Ok(())
        }
        TurnsAction::Cancel { number } => {
            let desk = OperatorDesk::new(backend, None);
            let turn = find_turn(&desk, &number).await?;
            desk.cancel(&turn).await?;
            println!("Cancelled: {}", turn.number);
            Ok(())
        }
    }
}

async fn find_turn(desk: &OperatorDesk, number: &str) -> anyhow::Result<Turn> {
    let number = TurnNumber::from(number);
    desk.queue()
        .await?
        .into_iter()
        .find(|t| t.number == number)
        .ok_or_else(|| anyhow::anyhow!("no active turn {number}"))
}

// ---------------------------------------------------------------------------
// assign / print
// ---------------------------------------------------------------------------

fn pipeline(config: &Config, backend: Arc<dyn Backend>) -> TicketPipeline {
    TicketPipeline::standard(TicketRenderer::new(&config.ticket), &config.printer, backend)
}

async fn cmd_assign(
    config: &Config,
    backend: Arc<dyn Backend>,
    flow: AssignFlow,
) -> anyhow::Result<()> {
    let pipeline = Arc::new(pipeline(config, Arc::clone(&backend)));
    let kiosk = Kiosk::new(backend, pipeline, config.kiosk_dwell);

    let (document, appointment) = match flow {
        AssignFlow::Billing {
            document,
            appointment,
        } => {
            kiosk.update(|w| w.select_service(Service::Billing))?;
            (document, appointment)
        }
        AssignFlow::Appointment { document } => {
            kiosk.update(|w| w.select_service(Service::AppointmentAssignment))?;
            (document, 0)
        }
        AssignFlow::Priority {
            document,
            purpose,
            reason,
            appointment,
        } => {
            let subtype = match purpose {
                PurposeArg::Billing => PrioritySubtype::ForBilling,
                PurposeArg::Appointment => PrioritySubtype::ForAppointment,
            };
            kiosk.update(|w| w.select_service(Service::Priority))?;
            kiosk.update(|w| w.select_priority(subtype, reason))?;
            (document, appointment)
        }
    };

    kiosk.update(|w| w.select_document_type(document.kind))?;
    kiosk.update(|w| w.set_document_number(&document.number))?;

    if let Err(e) = kiosk.proceed().await {
        let notice = kiosk.state().notice().map(ToString::to_string);
        anyhow::bail!("{}", notice.unwrap_or_else(|| e.to_string()));
    }
    if kiosk.step() == Step::PatientConfirm {
        let state = kiosk.state();
        if let Some(patient) = state.patient() {
            println!("Paciente: {}", patient.full_name());
        }
        kiosk.update(|w| w.select_appointment(appointment))?;
        if let Err(e) = kiosk.proceed().await {
            let notice = kiosk.state().notice().map(ToString::to_string);
            anyhow::bail!("{}", notice.unwrap_or_else(|| e.to_string()));
        }
    }

    let state = kiosk.state();
    let Some(turn) = state.issued().cloned() else {
        anyhow::bail!("no turn was issued");
    };
    println!("TURNO {} ({})", turn.number, turn.destination_label());

    // Wait for the background delivery, bounded by the kiosk dwell.
    let deadline = tokio::time::Instant::now() + config.kiosk_dwell;
    loop {
        let state = kiosk.state();
        if state.session() != 0 {
            break;
        }
        match state.delivery() {
            DeliveryStatus::Printed { stage } => {
                println!("Ticket printed via {stage}");
                break;
            }
            DeliveryStatus::Failed => {
                println!("Ticket not printed; the turn number above is valid.");
                break;
            }
            DeliveryStatus::NotStarted | DeliveryStatus::Pending => {}
        }
        if tokio::time::Instant::now() >= deadline {
            println!("Ticket delivery still pending.");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

async fn cmd_print(
    config: &Config,
    backend: Arc<dyn Backend>,
    number: String,
    module: Option<Module>,
) -> anyhow::Result<()> {
    let desk = OperatorDesk::new(Arc::clone(&backend), None);
    let turn = find_turn(&desk, &number).await?;
    let outcome = pipeline(config, backend).deliver(&turn, module).await;
    if outcome.success {
        println!(
            "Printed {} via {} after {} attempt(s)",
            turn.number,
            outcome.stage.as_deref().unwrap_or("-"),
            outcome.attempts
        );
        Ok(())
    } else {
        anyhow::bail!(
            "ticket for {} not printed after {} attempt(s) (delivery {})",
            turn.number,
            outcome.attempts,
            outcome.delivery_id
        )
    }
}

async fn cmd_stats(backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let stats = backend.statistics().await?;
    println!("Total:                 {}", stats.total);
    println!("Today:                 {}", stats.today);
    println!("Billing:               {}", stats.billing);
    println!("Appointment:           {}", stats.appointment_assignment);
    println!("Preferential:          {}", stats.preferential);
    Ok(())
}
