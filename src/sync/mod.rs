//! Synchronization engine: keeps a display surface consistent with the
//! backend listing using only periodic pull.
//!
//! The pure pieces ([`ArrivalTracker`], [`Rotation`], [`SurfaceView`]) are
//! usable on their own; [`SyncEngine`] wires them to tokio timers.

pub mod engine;
pub mod rotation;
pub mod tracker;
pub mod view;

pub use engine::{SurfaceHandle, SurfaceObserver, SyncEngine};
pub use rotation::Rotation;
pub use tracker::ArrivalTracker;
pub use view::SurfaceView;
