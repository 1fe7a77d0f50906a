//! Actor plumbing shared by the coordinator, the liveness monitor and unit links.

pub mod handle;
pub mod messages;

pub use handle::{ActorHandle, ActorOutcome, DEFAULT_SEND_TIMEOUT, SendError};
pub use messages::{
    ConnectionEvent, FleetEvent, FleetMessage, FleetState, LivenessMessage, LivenessPhase,
    LivenessState,
};
