//! Per-unit links: a connection actor paired with a frame dispatcher.

pub mod connection;
pub mod dispatcher;

pub use connection::{ConnectionActor, ConnectionHandle};
pub use dispatcher::FrameDispatcher;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use swarm_proto::{UnitId, ser};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actor::{ActorHandle, ActorOutcome, ConnectionEvent, FleetMessage};
use crate::domain::Unit;
use crate::liveness::{LivenessHandle, Prober};

/// What every new link needs from the service.
#[derive(Debug, Clone)]
pub struct LinkContext {
    pub coordinator: ActorHandle<FleetMessage>,
    pub liveness: LivenessHandle,
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
}

/// Spawn the connection actor, dispatcher and lifecycle relay of one unit.
///
/// Everyone subscribes before the actor starts connecting.
pub fn spawn_link(
    unit: &Unit,
    ctx: &LinkContext,
    parent: &CancellationToken,
    tasks: &mut JoinSet<ActorOutcome>,
) -> ConnectionHandle {
    let (actor, handle) = ConnectionActor::new(
        unit.id,
        unit.address.clone(),
        ctx.connect_timeout,
        ctx.outbound_capacity,
        parent.child_token(),
    );
    let dispatcher = FrameDispatcher::new(handle.clone(), ctx.coordinator.clone(), ctx.liveness.clone());
    let relay = relay_lifecycle(
        unit.id,
        handle.subscribe(),
        ctx.coordinator.clone(),
        handle.cancellation_token(),
    );

    tasks.spawn(relay);
    tasks.spawn(dispatcher.run());
    tasks.spawn(actor.run());
    handle
}

/// Forward a link's lifecycle events into the coordinator's mailbox.
async fn relay_lifecycle(
    unit_id: UnitId,
    mut events: broadcast::Receiver<ConnectionEvent>,
    coordinator: ActorHandle<FleetMessage>,
    cancellation_token: CancellationToken,
) -> ActorOutcome {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    if coordinator.deliver(FleetMessage::Connection(event)).await.is_err() {
                        return ActorOutcome::Stopped;
                    }
                    if terminal {
                        return ActorOutcome::Completed;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(unit_id, skipped, "Lifecycle relay lagged");
                }
                Err(RecvError::Closed) => return ActorOutcome::Stopped,
            },
            _ = cancellation_token.cancelled() => return ActorOutcome::Cancelled,
        }
    }
}

/// Links of the initialized fleet, keyed by unit id.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: BTreeMap<UnitId, ConnectionHandle>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link: ConnectionHandle) -> Option<ConnectionHandle> {
        self.links.insert(link.unit_id(), link)
    }

    pub fn get(&self, unit_id: UnitId) -> Option<&ConnectionHandle> {
        self.links.get(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Close every link and empty the table.
    pub fn close_all(&mut self) {
        for link in self.links.values() {
            link.close();
        }
        self.links.clear();
    }
}

#[async_trait]
impl Prober for LinkTable {
    async fn probe(&self, unit_id: UnitId) -> bool {
        match self.links.get(&unit_id) {
            Some(link) => link.send_frame(ser::encode_ask_availability()).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::DEFAULT_SEND_TIMEOUT;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_relay_waits_out_a_busy_coordinator() {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let coordinator = ActorHandle::new(tx, token.clone(), "coordinator");
        coordinator.try_send(FleetMessage::AskInit).unwrap();

        let (events_tx, events_rx) = broadcast::channel(4);
        let relay = tokio::spawn(relay_lifecycle(7, events_rx, coordinator, token.child_token()));
        events_tx.send(ConnectionEvent::Failed { unit_id: 7 }).unwrap();

        tokio::time::sleep(DEFAULT_SEND_TIMEOUT * 5).await;
        assert!(matches!(rx.recv().await, Some(FleetMessage::AskInit)));
        assert!(matches!(
            rx.recv().await,
            Some(FleetMessage::Connection(ConnectionEvent::Failed { unit_id: 7 }))
        ));
        assert_eq!(relay.await.unwrap(), ActorOutcome::Completed);
    }
}
