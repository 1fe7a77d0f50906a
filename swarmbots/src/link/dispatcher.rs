//! Frame dispatcher: reads a unit's frames and routes the decoded events.

use swarm_proto::types::HEADER_LEN;
use swarm_proto::{InboundEvent, UnitEvent, UnitId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};

use super::connection::ConnectionHandle;
use crate::actor::{ActorHandle, ActorOutcome, ConnectionEvent, FleetMessage};
use crate::liveness::LivenessHandle;

/// Reads frames from one link once it is established.
///
/// Probe answers go to the liveness monitor, everything else that decodes
/// goes to the coordinator. Unknown frames are dropped.
pub struct FrameDispatcher {
    unit_id: UnitId,
    link: ConnectionHandle,
    events: broadcast::Receiver<ConnectionEvent>,
    coordinator: ActorHandle<FleetMessage>,
    liveness: LivenessHandle,
}

impl FrameDispatcher {
    /// Subscribes to the link right away so `Established` cannot be missed.
    pub fn new(
        link: ConnectionHandle,
        coordinator: ActorHandle<FleetMessage>,
        liveness: LivenessHandle,
    ) -> Self {
        Self {
            unit_id: link.unit_id(),
            events: link.subscribe(),
            link,
            coordinator,
            liveness,
        }
    }

    pub async fn run(mut self) -> ActorOutcome {
        if !self.wait_established().await {
            return ActorOutcome::Completed;
        }
        debug!(unit_id = self.unit_id, "Dispatcher reading frames");

        loop {
            let header = self.link.read(HEADER_LEN).await;
            if header.len() < HEADER_LEN {
                break;
            }

            let body_len = header[1] as usize;
            if body_len == 0 {
                info!(unit_id = self.unit_id, "Unit hung up");
                self.link.mark_lost();
                break;
            }

            let body = self.link.read(body_len).await;
            if body.len() < body_len {
                break;
            }
            self.route(swarm_proto::decode(self.unit_id, &body)).await;
        }

        debug!(unit_id = self.unit_id, "Dispatcher stopped");
        ActorOutcome::Completed
    }

    async fn wait_established(&mut self) -> bool {
        loop {
            match self.events.recv().await {
                Ok(ConnectionEvent::Established { .. }) => return true,
                Ok(_) => return false,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(unit_id = self.unit_id, skipped, "Dispatcher lagged on link events");
                    if self.link.is_connected() {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    async fn route(&self, event: UnitEvent) {
        let result = match event.event {
            InboundEvent::Nothing => {
                trace!(unit_id = self.unit_id, "Ignoring unknown frame");
                return;
            }
            InboundEvent::Availability => self.liveness.probe_response(event.unit_id).await,
            _ => self.coordinator.deliver(FleetMessage::Unit(event)).await,
        };

        if let Err(e) = result {
            warn!(unit_id = self.unit_id, error = %e, "Failed to route unit event");
        }
    }
}
