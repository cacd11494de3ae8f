//! Ticket rendering and the delivery cascade.

pub mod delivery;
pub mod render;

pub use delivery::{
    Capability, DeliveryOutcome, DeliveryStage, LocalSurfaceStage, RemoteMode, RemoteSinkStage,
    TicketPipeline,
};
pub use render::{TicketArtifact, TicketRenderer};
