//! Liveness monitoring: round-robin availability probes with timeouts.

mod monitor;

pub use monitor::{LivenessConfig, LivenessMonitor};

use std::sync::Arc;

use async_trait::async_trait;
use swarm_proto::UnitId;
use tokio::sync::{oneshot, watch};

use crate::actor::{ActorHandle, LivenessMessage, LivenessState, SendError};
use crate::domain::RosterSnapshot;

/// Sends an availability probe to a unit.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns `false` when the probe could not be sent.
    async fn probe(&self, unit_id: UnitId) -> bool;
}

/// Prober that sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProber;

#[async_trait]
impl Prober for NoOpProber {
    async fn probe(&self, _unit_id: UnitId) -> bool {
        false
    }
}

/// Handle to the liveness monitor.
#[derive(Debug, Clone)]
pub struct LivenessHandle {
    inner: ActorHandle<LivenessMessage>,
}

impl LivenessHandle {
    pub fn new(inner: ActorHandle<LivenessMessage>) -> Self {
        Self { inner }
    }

    pub async fn prepare_unit(&self, unit_id: UnitId) -> Result<(), SendError> {
        self.inner.send(LivenessMessage::PrepareUnit { unit_id }).await
    }

    pub async fn start(
        &self,
        roster: watch::Receiver<RosterSnapshot>,
        prober: Arc<dyn Prober>,
    ) -> Result<(), SendError> {
        self.inner
            .send(LivenessMessage::Start { roster, prober })
            .await
    }

    pub async fn probe_response(&self, unit_id: UnitId) -> Result<(), SendError> {
        self.inner
            .send(LivenessMessage::ProbeResponse { unit_id })
            .await
    }

    pub async fn suspend(&self) -> Result<(), SendError> {
        self.inner.send(LivenessMessage::Suspend).await
    }

    pub async fn quit(&self) -> Result<(), SendError> {
        self.inner.send(LivenessMessage::Quit).await
    }

    pub async fn state(&self) -> Result<LivenessState, SendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.send(LivenessMessage::GetState(reply_tx)).await?;
        reply_rx.await.map_err(|_| SendError::ActorStopped)
    }
}
