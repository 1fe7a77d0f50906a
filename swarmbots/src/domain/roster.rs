use std::sync::Arc;

use swarm_proto::UnitId;

use super::unit::{ConnectionState, SelectionState, Unit};
use crate::config::RosterEntry;

/// Immutable view of the roster handed to observers.
pub type RosterSnapshot = Arc<Vec<Unit>>;

/// Outcome of a selection request that changed something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionChange {
    pub previous: Option<UnitId>,
    pub current: UnitId,
}

/// Ordered units where index `i` holds unit `i + 1`.
///
/// At most one unit is selected at any time, and only a connected unit
/// can become selected.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    units: Vec<Unit>,
}

impl Roster {
    /// Entries must already be dense and sorted by id.
    pub fn from_entries(entries: &[RosterEntry]) -> Self {
        Self {
            units: entries.iter().map(Unit::from).collect(),
        }
    }

    pub fn from_units(units: Vec<Unit>) -> Self {
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        (id as usize).checked_sub(1).and_then(|i| self.units.get(i))
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        let index = (id as usize).checked_sub(1)?;
        self.units.get_mut(index)
    }

    pub fn at(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        Arc::new(self.units.clone())
    }

    /// Index of the first connected unit at or after `from`.
    pub fn next_connected(&self, from: usize) -> Option<usize> {
        self.units
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, unit)| unit.is_connected())
            .map(|(index, _)| index)
    }

    pub fn connected_ids(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|unit| unit.is_connected())
            .map(|unit| unit.id)
            .collect()
    }

    pub fn selected(&self) -> Option<UnitId> {
        self.units
            .iter()
            .find(|unit| unit.is_selected())
            .map(|unit| unit.id)
    }

    /// Mark a unit connected or disconnected. Returns `true` if the state changed.
    ///
    /// A unit that disconnects also loses the selection.
    pub fn set_connection(&mut self, id: UnitId, state: ConnectionState) -> bool {
        let Some(unit) = self.get_mut(id) else {
            return false;
        };
        if unit.connection_state == state {
            return false;
        }
        unit.connection_state = state;
        if state == ConnectionState::Disconnected {
            unit.selection_state = SelectionState::Unselected;
        }
        true
    }

    /// Select `id`, unselecting any previous selection.
    ///
    /// Returns `None` when nothing changes: unknown or disconnected unit,
    /// or the unit is already selected.
    pub fn select(&mut self, id: UnitId) -> Option<SelectionChange> {
        let unit = self.get(id)?;
        if !unit.is_connected() || unit.is_selected() {
            return None;
        }

        let previous = self.unselect_all();
        if let Some(unit) = self.get_mut(id) {
            unit.selection_state = SelectionState::Selected;
        }
        Some(SelectionChange {
            previous,
            current: id,
        })
    }

    /// Clear the selection. Returns the unit that was selected, if any.
    pub fn unselect_all(&mut self) -> Option<UnitId> {
        let mut previous = None;
        for unit in self.units.iter_mut().filter(|unit| unit.is_selected()) {
            unit.selection_state = SelectionState::Unselected;
            previous = Some(unit.id);
        }
        previous
    }
}
