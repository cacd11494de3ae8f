//! Surface configuration files and filters.

use chrono::Utc;
use digiturno::error::Error;
use digiturno::model::*;
use digiturno::surface::{SurfaceConfig, SurfaceFilter, SurfaceRegistry};
use std::fs;
use std::time::Duration;

fn write(dir: &std::path::Path, file: &str, content: &str) {
    fs::write(dir.join(file), content).unwrap();
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn loads_every_toml_file_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dashboard.toml",
        r#"
[surface]
name = "dashboard"
"#,
    );
    write(
        dir.path(),
        "lobby.toml",
        r#"
[surface]
name = "lobby"
filter = "billing"
poll_interval_secs = 3
rotation_interval_secs = 8
alerts = false
"#,
    );
    write(dir.path(), "README.md", "not a surface");

    let registry = SurfaceRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.names(), vec!["dashboard", "lobby"]);

    let dashboard = registry.get("dashboard").unwrap();
    assert_eq!(dashboard.filter, SurfaceFilter::All);
    assert_eq!(dashboard.poll_interval(), Duration::from_secs(10));
    assert_eq!(dashboard.rotation_interval(), None);
    assert!(dashboard.alerts);

    let lobby = registry.get("lobby").unwrap();
    assert_eq!(lobby.filter, SurfaceFilter::Billing);
    assert_eq!(lobby.poll_interval(), Duration::from_secs(3));
    assert_eq!(lobby.rotation_interval(), Some(Duration::from_secs(8)));
    assert!(!lobby.alerts);
}

#[test]
fn duplicate_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.toml", "[surface]\nname = \"lobby\"\n");
    write(dir.path(), "b.toml", "[surface]\nname = \"lobby\"\n");
    let err = SurfaceRegistry::load_from_dir(dir.path()).err().unwrap();
    assert!(matches!(err, Error::Config(ref m) if m.contains("declared twice")));
}

#[test]
fn zero_interval_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "fast.toml",
        "[surface]\nname = \"fast\"\npoll_interval_secs = 0\n",
    );
    let err = SurfaceRegistry::load_from_dir(dir.path()).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn unknown_filter_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "odd.toml",
        "[surface]\nname = \"odd\"\nfilter = \"laboratory\"\n",
    );
    let err = SurfaceRegistry::load_from_dir(dir.path()).err().unwrap();
    assert!(matches!(err, Error::Config(ref m) if m.contains("odd.toml")));
}

#[test]
fn missing_dir_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SurfaceRegistry::load_from_dir(&dir.path().join("nope"))
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn registry_insert_replaces_by_name() {
    let mut registry = SurfaceRegistry::empty();
    assert!(registry.is_empty());
    registry.insert(SurfaceConfig::new("desk", SurfaceFilter::All));
    registry.insert(SurfaceConfig::new("desk", SurfaceFilter::Appointments).with_poll_interval(2));
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get("desk").unwrap().filter,
        SurfaceFilter::Appointments
    );
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[test]
fn filters_follow_lanes() {
    let billing = Turn::new("F1", Module::Billing, Utc::now());
    let routed = Turn::new("P1", Module::Preferential, Utc::now())
        .with_priority(PriorityReason::Elderly)
        .with_operator_role(OperatorRole::AppointmentScheduler);

    assert!(SurfaceFilter::Billing.matches(&billing));
    assert!(!SurfaceFilter::Billing.matches(&routed));
    assert!(SurfaceFilter::Appointments.matches(&routed));
    assert!(SurfaceFilter::All.matches(&routed));

    assert!(!SurfaceFilter::WithAppointment.matches(&billing));
    assert!(SurfaceFilter::WithAppointment.matches(&billing.with_appointment(Appointment::new(1))));
}

#[test]
fn server_lane_only_for_lane_filters() {
    assert_eq!(SurfaceFilter::Billing.server_lane(), Some(Lane::Billing));
    assert_eq!(
        SurfaceFilter::Appointments.server_lane(),
        Some(Lane::Appointments)
    );
    assert_eq!(SurfaceFilter::All.server_lane(), None);
    assert_eq!(SurfaceFilter::WithAppointment.server_lane(), None);
}
