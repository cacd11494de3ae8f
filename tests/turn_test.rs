//! Turn model: ordering, classification, lifecycle.

use chrono::{DateTime, Duration, TimeZone, Utc};
use digiturno::error::Error;
use digiturno::model::*;
use std::cmp::Ordering;

fn at(minutes_ago: i64) -> DateTime<Utc> {
    base() - Duration::minutes(minutes_ago)
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 15, 0, 0).unwrap()
}

fn turn(number: &str, module: Module, minutes_ago: i64) -> Turn {
    Turn::new(number, module, at(minutes_ago))
}

// ---------------------------------------------------------------------------
// rank
// ---------------------------------------------------------------------------

#[test]
fn priority_dominates_wait_time() {
    let fresh_priority = Turn::new("P1", Module::Preferential, base() - Duration::seconds(1))
        .with_priority(PriorityReason::Elderly);
    let old_regular = turn("F1", Module::Billing, 60);

    assert_eq!(rank(&fresh_priority, &old_regular), Ordering::Less);
    assert_eq!(rank(&old_regular, &fresh_priority), Ordering::Greater);
}

#[test]
fn fifo_within_priority_class() {
    let early = turn("F2", Module::Billing, 20);
    let late = turn("F1", Module::Billing, 5);
    assert_eq!(rank(&early, &late), Ordering::Less);
}

#[test]
fn missing_timestamp_sorts_after_timestamped() {
    let mut unknown = turn("F9", Module::Billing, 0);
    unknown.assigned_at = None;
    let known = turn("F1", Module::Billing, 1);
    assert_eq!(rank(&known, &unknown), Ordering::Less);
}

#[test]
fn rank_is_a_strict_total_order() {
    let mut same_time_other_module = turn("7", Module::AppointmentAssignment, 10);
    same_time_other_module.operator_role = Some(OperatorRole::AppointmentScheduler);
    let mut no_time = turn("3", Module::Billing, 0);
    no_time.assigned_at = None;

    let turns = vec![
        turn("7", Module::Billing, 10),
        same_time_other_module,
        turn("8", Module::Billing, 10),
        turn("1", Module::Billing, 45),
        turn("P1", Module::Preferential, 2).with_priority(PriorityReason::Pregnancy),
        turn("P2", Module::Preferential, 2).with_priority(PriorityReason::Disability),
        no_time,
    ];

    for a in &turns {
        assert_eq!(rank(a, a), Ordering::Equal);
        for b in &turns {
            if a.key() != b.key() {
                assert_ne!(rank(a, b), Ordering::Equal, "{} vs {}", a.key(), b.key());
            }
            assert_eq!(rank(a, b), rank(b, a).reverse());
            for c in &turns {
                if rank(a, b) == Ordering::Less && rank(b, c) == Ordering::Less {
                    assert_eq!(rank(a, c), Ordering::Less);
                }
            }
        }
    }
}

#[test]
fn sorting_is_stable_across_repeated_sorts() {
    let mut turns = vec![
        turn("3", Module::Billing, 5),
        turn("1", Module::Billing, 5),
        turn("2", Module::Preferential, 1).with_priority(PriorityReason::Elderly),
    ];
    turns.sort_by(rank);
    let first: Vec<_> = turns.iter().map(|t| t.number.to_string()).collect();
    turns.reverse();
    turns.sort_by(rank);
    let second: Vec<_> = turns.iter().map(|t| t.number.to_string()).collect();
    assert_eq!(first, vec!["2", "1", "3"]);
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// bucket / urgency
// ---------------------------------------------------------------------------

#[test]
fn bucket_excludes_terminal_states() {
    let t = turn("1", Module::Billing, 0);
    assert_eq!(bucket(&t), Some(Bucket::Pending));
    assert_eq!(
        bucket(&t.clone().with_state(TurnState::Called)),
        Some(Bucket::Called)
    );
    assert_eq!(bucket(&t.clone().with_state(TurnState::Attended)), None);
    assert_eq!(bucket(&t.with_state(TurnState::Cancelled)), None);
}

#[test]
fn urgency_thresholds() {
    let now = base();
    assert_eq!(turn("1", Module::Billing, 0).urgency(now), Urgency::Normal);
    assert_eq!(turn("1", Module::Billing, 30).urgency(now), Urgency::Normal);
    assert_eq!(turn("1", Module::Billing, 31).urgency(now), Urgency::Elevated);
    assert_eq!(turn("1", Module::Billing, 60).urgency(now), Urgency::Elevated);
    assert_eq!(turn("1", Module::Billing, 61).urgency(now), Urgency::Critical);
    assert_eq!(Urgency::classify(None, now), Urgency::Normal);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn transitions_move_forward_only() {
    let mut t = turn("1", Module::Billing, 0);
    t.transition(TurnState::Called).unwrap();
    t.transition(TurnState::Attended).unwrap();

    let err = t.transition(TurnState::Pending).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: TurnState::Attended,
            to: TurnState::Pending
        }
    ));
}

#[test]
fn cancel_is_allowed_from_non_terminal_states() {
    assert!(TurnState::Pending.can_transition_to(TurnState::Cancelled));
    assert!(TurnState::Called.can_transition_to(TurnState::Cancelled));
    assert!(!TurnState::Attended.can_transition_to(TurnState::Cancelled));
    assert!(!TurnState::Pending.can_transition_to(TurnState::Attended));
    assert!(!TurnState::Called.can_transition_to(TurnState::Pending));
}

// ---------------------------------------------------------------------------
// Labels and codes
// ---------------------------------------------------------------------------

#[test]
fn preferential_turns_route_by_operator_role() {
    let t = turn("P1", Module::Preferential, 0).with_priority(PriorityReason::Elderly);
    assert_eq!(t.lane(), Lane::Billing);
    assert_eq!(t.destination_label(), "PREFERENCIAL");

    let routed = t.with_operator_role(OperatorRole::AppointmentScheduler);
    assert_eq!(routed.lane(), Lane::Appointments);
    assert_eq!(routed.destination_label(), "ASIGNACIÓN DE CITAS");
}

#[test]
fn priority_reason_codes() {
    assert_eq!(
        PriorityReason::from_code("adulto_mayor"),
        Some(PriorityReason::Elderly)
    );
    assert_eq!(
        PriorityReason::from_code("EMBARAZO"),
        Some(PriorityReason::Pregnancy)
    );
    assert_eq!(
        PriorityReason::from_code("lactancia"),
        Some(PriorityReason::Other("LACTANCIA".to_string()))
    );
    assert_eq!(PriorityReason::from_code("  "), None);
    assert_eq!(PriorityReason::Unspecified.code(), "SIN_MOTIVO");
}

#[test]
fn turn_key_combines_number_and_module() {
    let t = turn("12", Module::AppointmentAssignment, 0);
    assert_eq!(t.key().to_string(), "12-ASIGNACION_CITA");
}

#[test]
fn display_name_prefers_patient_record() {
    let mut patient = Patient::new(7);
    patient.first_name = Some("Ana".to_string());
    patient.first_surname = Some("Gómez".to_string());

    let t = turn("1", Module::Billing, 0).with_patient_name("CC 123");
    assert_eq!(t.display_name().as_deref(), Some("CC 123"));
    assert_eq!(
        t.with_patient(patient).display_name().as_deref(),
        Some("Ana Gómez")
    );
}

#[test]
fn module_codes_round_trip_case_insensitively() {
    for module in Module::ALL {
        assert_eq!(Module::from_code(&module.code().to_lowercase()), Some(module));
    }
    assert_eq!(Module::from_service_key("asignacion"), Some(Module::AppointmentAssignment));
    assert_eq!(Module::from_code("LABORATORIO"), None);
}
