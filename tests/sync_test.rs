//! Synchronization engine: arrival detection, in-flight guard, failure
//! handling, cancellation, and rotation. All engine tests run on a paused
//! tokio clock.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use digiturno::backend::InMemoryBackend;
use digiturno::backend::memory::LIST_ACTIVE;
use digiturno::error::Error;
use digiturno::model::*;
use digiturno::surface::{SurfaceConfig, SurfaceFilter};
use digiturno::sync::{
    ArrivalTracker, Rotation, SurfaceHandle, SurfaceObserver, SurfaceView, SyncEngine,
};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

fn called(number: &str, seconds: i64) -> Turn {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + ChronoDuration::seconds(seconds);
    Turn::new(number, Module::Billing, at).with_state(TurnState::Called)
}

fn pending(number: &str, module: Module, seconds: i64) -> Turn {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + ChronoDuration::seconds(seconds);
    Turn::new(number, module, at)
}

fn numbers(turns: &[Turn]) -> Vec<String> {
    turns.iter().map(|t| t.number.to_string()).collect()
}

#[derive(Default)]
struct Recorder {
    snapshots: Mutex<Vec<SurfaceView>>,
    arrivals: Mutex<Vec<Vec<String>>>,
    featured: Mutex<Vec<String>>,
}

impl Recorder {
    fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    fn arrivals(&self) -> Vec<Vec<String>> {
        self.arrivals.lock().unwrap().clone()
    }

    fn callbacks(&self) -> usize {
        self.snapshot_count() + self.arrivals().len() + self.featured.lock().unwrap().len()
    }
}

impl SurfaceObserver for Recorder {
    fn on_snapshot(&self, view: &SurfaceView) {
        self.snapshots.lock().unwrap().push(view.clone());
    }

    fn on_new_arrivals(&self, arrivals: &[Turn]) {
        self.arrivals.lock().unwrap().push(numbers(arrivals));
    }

    fn on_featured(&self, turn: &Turn) {
        self.featured.lock().unwrap().push(turn.number.to_string());
    }
}

fn engine(backend: &Arc<InMemoryBackend>, config: SurfaceConfig) -> SyncEngine {
    SyncEngine::new(backend.clone(), config)
}

// ---------------------------------------------------------------------------
// Arrival tracking
// ---------------------------------------------------------------------------

#[test]
fn tracker_reports_each_key_once() {
    let a = called("A", 0);
    let b = called("B", 1);
    let mut tracker = ArrivalTracker::new();

    let events: Vec<Vec<String>> = [vec![], vec![a.clone()], vec![a.clone(), b.clone()], vec![a, b]]
        .iter()
        .map(|snapshot| numbers(&tracker.observe(snapshot)))
        .collect();

    assert_eq!(
        events,
        vec![vec![], vec!["A".to_string()], vec!["B".to_string()], vec![]]
    );
}

#[test]
fn tracker_keys_include_module() {
    let mut tracker = ArrivalTracker::new();
    let billing = called("1", 0);
    let mut appointments = called("1", 0);
    appointments.module = Module::AppointmentAssignment;

    assert_eq!(tracker.observe(&[billing.clone()]).len(), 1);
    assert_eq!(tracker.observe(&[billing, appointments]).len(), 1);
    assert_eq!(tracker.len(), 2);
}

#[test]
fn tracker_does_not_re_report_a_returning_key() {
    let mut tracker = ArrivalTracker::new();
    let a = called("A", 0);
    tracker.observe(&[a.clone()]);
    tracker.observe(&[]);
    assert!(tracker.observe(&[a]).is_empty());
}

#[test]
fn rotation_clamps_when_called_list_shrinks() {
    let mut rotation = Rotation::new();
    rotation.resize(5);
    while rotation.current() != Some(4) {
        rotation.advance();
    }
    rotation.resize(2);
    let index = rotation.current().unwrap();
    assert!(index <= 1);
}

#[test]
fn view_filters_buckets_and_ranks() {
    let mut routed = pending("P1", Module::Preferential, 50).with_priority(PriorityReason::Elderly);
    routed.operator_role = Some(OperatorRole::BillingClerk);
    let turns = vec![
        pending("F2", Module::Billing, 20),
        pending("F1", Module::Billing, 10),
        pending("A1", Module::AppointmentAssignment, 0),
        called("F0", 0),
        routed,
        pending("F3", Module::Billing, 0).with_state(TurnState::Attended),
    ];
    let view = SurfaceView::build(turns, SurfaceFilter::Billing, Utc::now());
    assert_eq!(numbers(&view.pending), vec!["P1", "F1", "F2"]);
    assert_eq!(numbers(&view.called), vec!["F0"]);
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn new_arrivals_are_reported_exactly_once() {
    let backend = Arc::new(InMemoryBackend::new());
    let a = called("A", 0);
    let b = called("B", 1);
    backend.script_listing(vec![]);
    backend.script_listing(vec![a.clone()]);
    backend.script_listing(vec![a.clone(), b.clone()]);
    backend.script_listing(vec![a.clone(), b.clone()]);
    backend.set_turns(vec![a, b]);

    let recorder = Arc::new(Recorder::default());
    let handle = engine(&backend, SurfaceConfig::new("board", SurfaceFilter::All))
        .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(35)).await;
    handle.stop();

    assert_eq!(recorder.snapshot_count(), 4);
    assert_eq!(
        recorder.arrivals(),
        vec![vec!["A".to_string()], vec!["B".to_string()]]
    );
    assert_eq!(numbers(&handle.view().called), vec!["A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_blocks_overlapping_ticks() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_latency(LIST_ACTIVE, Duration::from_millis(2500));

    let recorder = Arc::new(Recorder::default());
    let _handle = engine(
        &backend,
        SurfaceConfig::new("board", SurfaceFilter::All).with_poll_interval(1),
    )
    .start(recorder.clone());

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 1);
    assert_eq!(recorder.snapshot_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 2);
    assert_eq!(backend.max_listings_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_last_snapshot() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.script_listing(vec![called("A", 0)]);

    let recorder = Arc::new(Recorder::default());
    let handle = engine(&backend, SurfaceConfig::new("board", SurfaceFilter::All))
        .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(numbers(&handle.view().called), vec!["A"]);

    backend.fail_next(LIST_ACTIVE, Error::Unavailable("timeout".to_string()));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 2);
    assert_eq!(recorder.snapshot_count(), 1);
    assert_eq!(numbers(&handle.view().called), vec!["A"]);

    // Next tick retries normally and sees the live (empty) table.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 3);
    assert_eq!(recorder.snapshot_count(), 2);
    assert!(handle.view().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_silences_every_callback() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0), called("B", 1)]);

    let recorder = Arc::new(Recorder::default());
    let handle = engine(
        &backend,
        SurfaceConfig::new("announce", SurfaceFilter::All).with_rotation(5),
    )
    .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = recorder.callbacks();
    assert!(before > 0);

    handle.stop();
    assert!(!handle.is_running());
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(recorder.callbacks(), before);
    assert_eq!(backend.calls(LIST_ACTIVE), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_in_flight_at_stop_is_discarded() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0)]);
    backend.set_latency(LIST_ACTIVE, Duration::from_secs(5));

    let recorder = Arc::new(Recorder::default());
    let handle = engine(&backend, SurfaceConfig::new("board", SurfaceFilter::All))
        .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 1);
    handle.stop();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(recorder.callbacks(), 0);
    assert!(handle.view().fetched_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_surface() {
    let backend = Arc::new(InMemoryBackend::new());
    let recorder = Arc::new(Recorder::default());
    let handle = engine(&backend, SurfaceConfig::new("board", SurfaceFilter::All))
        .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(handle);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.calls(LIST_ACTIVE), 1);
}

#[tokio::test(start_paused = true)]
async fn rotation_advances_featured_turn() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0), called("B", 1), called("C", 2)]);

    let recorder = Arc::new(Recorder::default());
    let handle = engine(
        &backend,
        SurfaceConfig::new("announce", SurfaceFilter::All)
            .with_poll_interval(60)
            .with_rotation(5),
    )
    .start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.view().featured_turn().map(|t| t.number.to_string()), Some("A".to_string()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*recorder.featured.lock().unwrap(), vec!["B", "C"]);
    assert_eq!(handle.view().featured, Some(2));
}

#[tokio::test(start_paused = true)]
async fn surfaces_keep_independent_baselines() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0)]);

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let _h1 = engine(&backend, SurfaceConfig::new("one", SurfaceFilter::All)).start(first.clone());
    tokio::time::sleep(Duration::from_secs(5)).await;
    let _h2 =
        engine(&backend, SurfaceConfig::new("two", SurfaceFilter::All)).start(second.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(first.arrivals(), vec![vec!["A".to_string()]]);
    assert_eq!(second.arrivals(), vec![vec!["A".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn surface_without_alerts_still_renders() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0)]);

    let mut config = SurfaceConfig::new("quiet", SurfaceFilter::All);
    config.alerts = false;
    let recorder = Arc::new(Recorder::default());
    let _handle = engine(&backend, config).start(recorder.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(recorder.snapshot_count(), 1);
    assert!(recorder.arrivals().is_empty());
}

/// Reads the board and stops the surface from inside its first snapshot.
#[derive(Default)]
struct SelfStopping {
    handle: OnceLock<Arc<SurfaceHandle>>,
    seen: Mutex<Vec<usize>>,
    arrivals: Mutex<usize>,
}

impl SurfaceObserver for SelfStopping {
    fn on_snapshot(&self, _view: &SurfaceView) {
        let handle = self.handle.get().unwrap();
        self.seen.lock().unwrap().push(handle.view().called.len());
        handle.stop();
    }

    fn on_new_arrivals(&self, _arrivals: &[Turn]) {
        *self.arrivals.lock().unwrap() += 1;
    }
}

#[tokio::test(start_paused = true)]
async fn observer_may_read_and_stop_its_own_surface() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_turns(vec![called("A", 0)]);

    let observer = Arc::new(SelfStopping::default());
    let handle = Arc::new(
        engine(&backend, SurfaceConfig::new("kiosk", SurfaceFilter::All)).start(observer.clone()),
    );
    assert!(observer.handle.set(Arc::clone(&handle)).is_ok());

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(*observer.seen.lock().unwrap(), vec![1]);
    assert_eq!(*observer.arrivals.lock().unwrap(), 0);
    assert!(!handle.is_running());
    assert_eq!(backend.calls(LIST_ACTIVE), 1);
}
