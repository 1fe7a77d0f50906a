//! Fleet domain model.

pub mod roster;
pub mod unit;

pub use roster::{Roster, RosterSnapshot, SelectionChange};
pub use unit::{ConnectionState, SelectionState, Unit, UnitAddress};
