use std::fmt;

use serde::{Deserialize, Serialize};
use swarm_proto::{OperatingMode, RadarState, UnitId};

use crate::config::RosterEntry;

/// Link state of a unit as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SelectionState {
    Selected,
    #[default]
    Unselected,
}

/// Network address of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for UnitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A remote unit and everything the controller knows about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub address: UnitAddress,
    pub mac_address: String,
    pub connection_state: ConnectionState,
    pub selection_state: SelectionState,
    pub obstacle: RadarState,
    pub mode: OperatingMode,
    pub missed_probe_count: u32,
}

impl Unit {
    pub fn new(id: UnitId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: UnitAddress {
                host: host.into(),
                port,
            },
            mac_address: String::new(),
            connection_state: ConnectionState::Disconnected,
            selection_state: SelectionState::Unselected,
            obstacle: RadarState::NotDetected,
            mode: OperatingMode::default(),
            missed_probe_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn is_selected(&self) -> bool {
        self.selection_state == SelectionState::Selected
    }
}

impl From<&RosterEntry> for Unit {
    fn from(entry: &RosterEntry) -> Self {
        let mut unit = Unit::new(entry.id, entry.ip_address.trim(), entry.port);
        unit.mac_address = entry.mac_address.clone();
        unit
    }
}
