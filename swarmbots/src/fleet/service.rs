use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::coordinator::{CoordinatorDeps, FleetCoordinator};
use super::events::FleetEvents;
use super::handle::FleetHandle;
use crate::Result;
use crate::actor::{ActorOutcome, FleetEvent};
use crate::config::{FleetConfig, RosterSource};
use crate::domain::RosterSnapshot;
use crate::liveness::{LivenessConfig, LivenessHandle, LivenessMonitor};
use crate::logsink::LogSink;

/// A running fleet: the coordinator and the liveness monitor.
pub struct FleetService {
    handle: FleetHandle,
    liveness: LivenessHandle,
    coordinator_task: JoinHandle<ActorOutcome>,
    liveness_task: JoinHandle<ActorOutcome>,
    cancellation_token: CancellationToken,
}

impl FleetService {
    /// Validate the configuration and spawn both actors.
    ///
    /// Nothing connects until [`FleetHandle::ask_init`] is called.
    pub fn start(
        config: FleetConfig,
        roster_source: Arc<dyn RosterSource>,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        config.validate()?;

        let cancellation_token = CancellationToken::new();
        let (fleet_handle, mailbox) =
            FleetCoordinator::channel(config.mailbox_capacity, cancellation_token.clone());

        let (monitor, liveness) = LivenessMonitor::new(
            LivenessConfig::from(&config),
            fleet_handle.clone(),
            config.mailbox_capacity,
            cancellation_token.child_token(),
        );

        let events = FleetEvents::new();
        let coordinator = FleetCoordinator::new(
            config,
            CoordinatorDeps {
                roster_source,
                log_sink,
                liveness: liveness.clone(),
                events: events.clone(),
            },
            fleet_handle.clone(),
            mailbox,
            cancellation_token.child_token(),
        );
        let handle = FleetHandle::new(fleet_handle, events, coordinator.roster_receiver());

        let liveness_task = tokio::spawn(monitor.run());
        let coordinator_task = tokio::spawn(coordinator.run());
        info!("Fleet service started");

        Ok(Self {
            handle,
            liveness,
            coordinator_task,
            liveness_task,
            cancellation_token,
        })
    }

    pub fn handle(&self) -> FleetHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.handle.subscribe()
    }

    pub fn roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.handle.roster()
    }

    /// Stop both actors and close every unit link.
    ///
    /// Does not ask units to disconnect; use
    /// [`FleetHandle::disconnect_all`] first for an orderly exit.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.quit().await {
            warn!(error = %e, "Coordinator already stopped");
        }
        if let Err(e) = self.liveness.quit().await {
            warn!(error = %e, "Liveness monitor already stopped");
        }

        for (name, task) in [
            ("coordinator", self.coordinator_task),
            ("liveness", self.liveness_task),
        ] {
            match task.await {
                Ok(outcome) => info!(actor = name, ?outcome, "Actor finished"),
                Err(e) => warn!(actor = name, error = %e, "Actor task failed"),
            }
        }

        self.cancellation_token.cancel();
        info!("Fleet service stopped");
    }
}
