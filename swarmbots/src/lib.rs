//! swarmbots library crate.
//!
//! Coordinates a fleet of networked robot units: one TCP link per unit,
//! a sequencing coordinator that owns the roster, and a liveness monitor
//! that probes connected units.

pub mod actor;
pub mod config;
pub mod domain;
pub mod error;
pub mod fleet;
pub mod link;
pub mod liveness;
pub mod logging;
pub mod logsink;

pub use error::{Error, Result};
pub use fleet::{FleetHandle, FleetService};
