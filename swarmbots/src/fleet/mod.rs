//! The fleet coordinator actor and its public surface.

pub mod coordinator;
pub mod events;
pub mod handle;
pub mod service;

pub use coordinator::{CoordinatorDeps, FleetCoordinator};
pub use events::{DEFAULT_EVENT_CAPACITY, FleetEvents};
pub use handle::FleetHandle;
pub use service::FleetService;
