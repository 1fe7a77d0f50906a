use swarm_proto::{Direction, OperatingMode, Peripheral, UnitId};
use tokio::sync::{broadcast, oneshot, watch};

use super::events::FleetEvents;
use crate::actor::{ActorHandle, FleetEvent, FleetMessage, FleetState, SendError};
use crate::domain::RosterSnapshot;

/// Public entry point to a running fleet: requests, roster snapshots and events.
#[derive(Debug, Clone)]
pub struct FleetHandle {
    inner: ActorHandle<FleetMessage>,
    events: FleetEvents,
    roster: watch::Receiver<RosterSnapshot>,
}

impl FleetHandle {
    pub fn new(
        inner: ActorHandle<FleetMessage>,
        events: FleetEvents,
        roster: watch::Receiver<RosterSnapshot>,
    ) -> Self {
        Self {
            inner,
            events,
            roster,
        }
    }

    /// Load the roster and bring every unit up.
    pub async fn ask_init(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::AskInit).await
    }

    pub async fn select(&self, unit_id: UnitId) -> Result<(), SendError> {
        self.inner.send(FleetMessage::Select(unit_id)).await
    }

    /// Clear the selection and switch every camera off.
    pub async fn unselect_all(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::UnselectAll).await
    }

    /// Switch one peripheral of the selected unit.
    pub async fn set_peripheral(
        &self,
        peripheral: Peripheral,
        enabled: bool,
    ) -> Result<(), SendError> {
        self.inner
            .send(FleetMessage::SetPeripheral {
                peripheral,
                enabled,
            })
            .await
    }

    /// Replace the whole mode of the selected unit.
    pub async fn set_mode(&self, mode: OperatingMode) -> Result<(), SendError> {
        self.inner.send(FleetMessage::SetMode(mode)).await
    }

    pub async fn begin_mode_negotiation(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::BeginModeNegotiation).await
    }

    /// Move the selected unit.
    pub async fn drive(&self, direction: Direction) -> Result<(), SendError> {
        self.inner.send(FleetMessage::Drive(direction)).await
    }

    pub async fn request_logs(&self, unit_id: UnitId) -> Result<(), SendError> {
        self.inner.send(FleetMessage::RequestLogs(unit_id)).await
    }

    /// Acknowledge a disconnection alert.
    pub async fn acknowledge(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::Acknowledge).await
    }

    pub async fn disconnect_all(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::DisconnectAll).await
    }

    pub async fn state(&self) -> Result<FleetState, SendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.send(FleetMessage::GetState(reply_tx)).await?;
        reply_rx.await.map_err(|_| SendError::ActorStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// Receiver of roster snapshots, updated on every change.
    pub fn roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster.clone()
    }

    /// Latest roster snapshot.
    pub fn snapshot(&self) -> RosterSnapshot {
        self.roster.borrow().clone()
    }

    pub(crate) async fn quit(&self) -> Result<(), SendError> {
        self.inner.send(FleetMessage::Quit).await
    }
}
