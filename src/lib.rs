//! # digiturno
//!
//! Client core for a walk-in turn (queue ticket) system.
//!
//! Provides the turn and priority model shared by every display surface,
//! a poll-diff-render synchronization engine per surface, the kiosk
//! assignment wizard, and a cascading ticket delivery pipeline. The backend
//! REST service owns all authoritative state; this crate only reads it and
//! asks it to change.

pub mod backend;
pub mod config;
pub mod desk;
pub mod error;
pub mod model;
pub mod surface;
pub mod sync;
pub mod telemetry;
pub mod ticket;
pub mod wizard;
