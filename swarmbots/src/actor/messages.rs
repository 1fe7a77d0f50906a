//! Message types exchanged between the fleet actors.
//!
//! - `FleetMessage`: sent to the fleet coordinator
//! - `LivenessMessage`: sent to the liveness monitor
//! - `ConnectionEvent`: lifecycle of one unit link
//! - `FleetEvent`: broadcast to observers outside the actor system

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use swarm_proto::{Direction, OperatingMode, Peripheral, UnitEvent, UnitId};
use tokio::sync::{oneshot, watch};

use crate::domain::RosterSnapshot;
use crate::liveness::Prober;

/// Lifecycle notifications published by a connection actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The TCP connection is up and the link accepts frames.
    Established { unit_id: UnitId },
    /// An established connection broke.
    Lost { unit_id: UnitId },
    /// The connection attempt failed or timed out.
    Failed { unit_id: UnitId },
}

impl ConnectionEvent {
    pub fn unit_id(&self) -> UnitId {
        match self {
            Self::Established { unit_id } | Self::Lost { unit_id } | Self::Failed { unit_id } => {
                *unit_id
            }
        }
    }

    /// Whether the link is finished after this event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Established { .. })
    }
}

/// States of the fleet coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FleetState {
    Idle,
    WaitingForConnection,
    WaitingForVarReady,
    Available,
    WaitingForModeNegotiation,
    WaitingForDisconnection,
    WaitingForPopupAck,
    Stopped,
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingForConnection => "waiting_for_connection",
            Self::WaitingForVarReady => "waiting_for_var_ready",
            Self::Available => "available",
            Self::WaitingForModeNegotiation => "waiting_for_mode_negotiation",
            Self::WaitingForDisconnection => "waiting_for_disconnection",
            Self::WaitingForPopupAck => "waiting_for_popup_ack",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Messages handled by the fleet coordinator.
#[derive(Debug)]
pub enum FleetMessage {
    /// Load the roster and connect every unit in turn.
    AskInit,
    /// Lifecycle event relayed from a unit link.
    Connection(ConnectionEvent),
    /// The liveness monitor finished preparing a unit.
    VarReady { unit_id: UnitId },
    /// Current missed probe count of a unit, reported by the liveness monitor.
    MissedProbes { unit_id: UnitId, count: u32 },
    /// The liveness monitor gave up on a unit.
    Unreachable { unit_id: UnitId },
    /// Decoded frame from a unit.
    Unit(UnitEvent),
    Select(UnitId),
    UnselectAll,
    SetPeripheral {
        peripheral: Peripheral,
        enabled: bool,
    },
    SetMode(OperatingMode),
    BeginModeNegotiation,
    Drive(Direction),
    RequestLogs(UnitId),
    /// Operator acknowledged a disconnection alert.
    Acknowledge,
    DisconnectAll,
    GetState(oneshot::Sender<FleetState>),
    Quit,
}

/// Phase of the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LivenessPhase {
    /// Preparing units; probing has not started.
    WaitingForRoster,
    /// Waiting for the next round.
    Idle,
    /// A probe is in flight.
    Probing,
}

/// Snapshot of the liveness monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessState {
    pub phase: LivenessPhase,
    pub in_flight: Option<UnitId>,
    pub missed: BTreeMap<UnitId, u32>,
}

/// Messages handled by the liveness monitor.
pub enum LivenessMessage {
    /// Reset a unit's missed count and answer with `VarReady`.
    PrepareUnit { unit_id: UnitId },
    /// Initialization is over: start probing the roster.
    Start {
        roster: watch::Receiver<RosterSnapshot>,
        prober: Arc<dyn Prober>,
    },
    /// A unit answered a probe.
    ProbeResponse { unit_id: UnitId },
    /// Stop probing until the next `Start`.
    Suspend,
    GetState(oneshot::Sender<LivenessState>),
    Quit,
}

impl fmt::Debug for LivenessMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrepareUnit { unit_id } => f
                .debug_struct("PrepareUnit")
                .field("unit_id", unit_id)
                .finish(),
            Self::Start { roster, .. } => f
                .debug_struct("Start")
                .field("units", &roster.borrow().len())
                .finish_non_exhaustive(),
            Self::ProbeResponse { unit_id } => f
                .debug_struct("ProbeResponse")
                .field("unit_id", unit_id)
                .finish(),
            Self::Suspend => f.write_str("Suspend"),
            Self::GetState(_) => f.write_str("GetState"),
            Self::Quit => f.write_str("Quit"),
        }
    }
}

/// Events published to observers of the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// Initialization finished (possibly with no units).
    InitReady,
    /// Every connected unit reported its mode.
    ModeReady,
    SelectionChanged { selected: Option<UnitId> },
    UnitConnected { unit_id: UnitId },
    UnitDisconnected { unit_id: UnitId },
    Alert { unit_id: UnitId, code: u8 },
    LogsReady { unit_id: UnitId, lines: Vec<String> },
    /// The fleet-wide disconnection finished.
    DisconnectionComplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_event_accessors() {
        let established = ConnectionEvent::Established { unit_id: 2 };
        assert_eq!(established.unit_id(), 2);
        assert!(!established.is_terminal());
        assert!(ConnectionEvent::Lost { unit_id: 2 }.is_terminal());
        assert!(ConnectionEvent::Failed { unit_id: 3 }.is_terminal());
    }

    #[test]
    fn test_fleet_event_serialization() {
        let json = serde_json::to_value(FleetEvent::Alert {
            unit_id: 1,
            code: 42,
        })
        .unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["unit_id"], 1);
        assert_eq!(json["code"], 42);
    }

    #[test]
    fn test_fleet_state_display() {
        assert_eq!(FleetState::Available.to_string(), "available");
        assert_eq!(
            FleetState::WaitingForPopupAck.to_string(),
            "waiting_for_popup_ack"
        );
    }
}
