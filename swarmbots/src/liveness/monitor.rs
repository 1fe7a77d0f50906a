use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use swarm_proto::UnitId;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{LivenessHandle, NoOpProber, Prober};
use crate::actor::{
    ActorHandle, ActorOutcome, FleetMessage, LivenessMessage, LivenessPhase, LivenessState,
};
use crate::config::{
    DEFAULT_MAX_MISSED_PROBES, DEFAULT_PROBE_PERIOD_MS, DEFAULT_PROBE_TIMEOUT_MS, FleetConfig,
};
use crate::domain::RosterSnapshot;

/// Timing and threshold of the liveness monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Delay between the end of a round and the start of the next one.
    pub probe_period: Duration,
    /// Time a unit has to answer one probe.
    pub probe_timeout: Duration,
    /// Missed probes tolerated; one more and the unit is reported unreachable.
    pub max_missed_probes: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_period: Duration::from_millis(DEFAULT_PROBE_PERIOD_MS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_missed_probes: DEFAULT_MAX_MISSED_PROBES,
        }
    }
}

impl From<&FleetConfig> for LivenessConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            probe_period: config.probe_period(),
            probe_timeout: config.probe_timeout(),
            max_missed_probes: config.max_missed_probes,
        }
    }
}

/// A one-shot timer that can be re-armed or cancelled at any time.
#[derive(Debug, Default)]
struct ProbeTimer {
    deadline: Option<Instant>,
}

impl ProbeTimer {
    fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Resolves at the deadline; never resolves while disarmed.
    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Probes connected units one at a time.
///
/// The outer timer starts a round; the inner timer bounds the wait for
/// each unit's answer. Only one probe is ever in flight.
pub struct LivenessMonitor {
    config: LivenessConfig,
    mailbox: mpsc::Receiver<LivenessMessage>,
    coordinator: ActorHandle<FleetMessage>,
    roster: Option<watch::Receiver<RosterSnapshot>>,
    prober: Arc<dyn Prober>,
    missed: BTreeMap<UnitId, u32>,
    /// Units already reported unreachable.
    escalated: BTreeSet<UnitId>,
    phase: LivenessPhase,
    in_flight: Option<UnitId>,
    next_index: usize,
    outer: ProbeTimer,
    inner: ProbeTimer,
    cancellation_token: CancellationToken,
}

impl LivenessMonitor {
    pub fn new(
        config: LivenessConfig,
        coordinator: ActorHandle<FleetMessage>,
        mailbox_capacity: usize,
        cancellation_token: CancellationToken,
    ) -> (Self, LivenessHandle) {
        let (tx, rx) = mpsc::channel(mailbox_capacity);
        let handle = LivenessHandle::new(ActorHandle::new(
            tx,
            cancellation_token.clone(),
            "liveness",
        ));
        let monitor = Self {
            config,
            mailbox: rx,
            coordinator,
            roster: None,
            prober: Arc::new(NoOpProber),
            missed: BTreeMap::new(),
            escalated: BTreeSet::new(),
            phase: LivenessPhase::WaitingForRoster,
            in_flight: None,
            next_index: 0,
            outer: ProbeTimer::default(),
            inner: ProbeTimer::default(),
            cancellation_token,
        };
        (monitor, handle)
    }

    pub async fn run(mut self) -> ActorOutcome {
        info!("Liveness monitor starting");

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    info!("Liveness monitor cancelled");
                    break ActorOutcome::Cancelled;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => {
                        if self.handle_message(msg).await {
                            break ActorOutcome::Stopped;
                        }
                    }
                    None => break ActorOutcome::Stopped,
                },

                _ = self.inner.expired() => self.on_probe_timeout().await,

                _ = self.outer.expired() => self.on_round_due().await,
            }
        };

        self.outer.cancel();
        self.inner.cancel();
        info!(?outcome, "Liveness monitor stopped");
        outcome
    }

    /// Returns `true` when the monitor should stop.
    async fn handle_message(&mut self, msg: LivenessMessage) -> bool {
        match msg {
            LivenessMessage::PrepareUnit { unit_id } => {
                self.missed.insert(unit_id, 0);
                self.escalated.remove(&unit_id);
                debug!(unit_id, "Liveness counter ready");
                if let Err(e) = self
                    .coordinator
                    .send(FleetMessage::VarReady { unit_id })
                    .await
                {
                    warn!(unit_id, error = %e, "Failed to report liveness counter ready");
                }
            }
            LivenessMessage::Start { roster, prober } => {
                let units = roster.borrow().len();
                self.roster = Some(roster);
                self.prober = prober;
                self.inner.cancel();
                self.in_flight = None;
                self.phase = LivenessPhase::Idle;
                self.outer.arm(self.config.probe_period);
                info!(
                    units,
                    period_ms = self.config.probe_period.as_millis() as u64,
                    "Liveness probing started"
                );
            }
            LivenessMessage::ProbeResponse { unit_id } => self.on_probe_response(unit_id).await,
            LivenessMessage::Suspend => {
                self.outer.cancel();
                self.inner.cancel();
                self.in_flight = None;
                self.roster = None;
                self.phase = LivenessPhase::WaitingForRoster;
                info!("Liveness probing suspended");
            }
            LivenessMessage::GetState(reply) => {
                let _ = reply.send(self.state());
            }
            LivenessMessage::Quit => return true,
        }
        false
    }

    fn state(&self) -> LivenessState {
        LivenessState {
            phase: self.phase,
            in_flight: self.in_flight,
            missed: self.missed.clone(),
        }
    }

    async fn on_round_due(&mut self) {
        self.outer.cancel();
        debug!("Liveness round starting");
        self.probe_from(0).await;
    }

    /// Probe the first eligible unit at or after roster index `start`, or
    /// end the round when there is none.
    async fn probe_from(&mut self, start: usize) {
        let Some(snapshot) = self.roster.as_ref().map(|roster| roster.borrow().clone()) else {
            self.phase = LivenessPhase::WaitingForRoster;
            return;
        };

        for (index, unit) in snapshot.iter().enumerate().skip(start) {
            if !unit.is_connected() || self.escalated.contains(&unit.id) {
                continue;
            }

            if self.prober.probe(unit.id).await {
                trace!(unit_id = unit.id, "Probe sent");
            } else {
                debug!(unit_id = unit.id, "Probe could not be sent");
            }
            self.in_flight = Some(unit.id);
            self.next_index = index + 1;
            self.inner.arm(self.config.probe_timeout);
            self.phase = LivenessPhase::Probing;
            return;
        }

        trace!("Liveness round complete");
        self.in_flight = None;
        self.phase = LivenessPhase::Idle;
        self.outer.arm(self.config.probe_period);
    }

    async fn on_probe_response(&mut self, unit_id: UnitId) {
        let previous = self.missed.insert(unit_id, 0).unwrap_or(0);
        if previous != 0 {
            self.report_missed(unit_id, 0).await;
        }

        if self.in_flight == Some(unit_id) {
            trace!(unit_id, "Probe answered");
            self.inner.cancel();
            self.in_flight = None;
            self.probe_from(self.next_index).await;
        } else {
            trace!(unit_id, "Availability received outside of a probe");
        }
    }

    async fn on_probe_timeout(&mut self) {
        self.inner.cancel();
        let Some(unit_id) = self.in_flight.take() else {
            return;
        };

        let count = self.missed.entry(unit_id).or_insert(0);
        *count += 1;
        let count = *count;
        debug!(unit_id, missed = count, "Probe timed out");
        self.report_missed(unit_id, count).await;

        if count > self.config.max_missed_probes && self.escalated.insert(unit_id) {
            warn!(unit_id, missed = count, "Unit stopped answering probes");
            if let Err(e) = self
                .coordinator
                .send(FleetMessage::Unreachable { unit_id })
                .await
            {
                warn!(unit_id, error = %e, "Failed to report unreachable unit");
            }
        }

        self.probe_from(self.next_index).await;
    }

    async fn report_missed(&self, unit_id: UnitId, count: u32) {
        if let Err(e) = self
            .coordinator
            .send(FleetMessage::MissedProbes { unit_id, count })
            .await
        {
            warn!(unit_id, error = %e, "Failed to report missed probes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionState, Unit};
    use async_trait::async_trait;

    struct RecordingProber {
        tx: mpsc::UnboundedSender<UnitId>,
    }

    #[async_trait]
    impl Prober for RecordingProber {
        async fn probe(&self, unit_id: UnitId) -> bool {
            self.tx.send(unit_id).is_ok()
        }
    }

    struct Fixture {
        handle: LivenessHandle,
        coordinator_rx: mpsc::Receiver<FleetMessage>,
        probes_rx: mpsc::UnboundedReceiver<UnitId>,
        roster_tx: watch::Sender<RosterSnapshot>,
        task: tokio::task::JoinHandle<ActorOutcome>,
    }

    fn config() -> LivenessConfig {
        LivenessConfig {
            probe_period: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            max_missed_probes: 1,
        }
    }

    fn snapshot(connected: &[bool]) -> RosterSnapshot {
        Arc::new(
            connected
                .iter()
                .enumerate()
                .map(|(i, &up)| {
                    let mut unit = Unit::new(i as UnitId + 1, "127.0.0.1", 9000);
                    if up {
                        unit.connection_state = ConnectionState::Connected;
                    }
                    unit
                })
                .collect(),
        )
    }

    async fn start(connected: &[bool]) -> Fixture {
        let (coordinator_tx, coordinator_rx) = mpsc::channel(32);
        let token = CancellationToken::new();
        let coordinator = ActorHandle::new(coordinator_tx, token.clone(), "coordinator");
        let (monitor, handle) = LivenessMonitor::new(config(), coordinator, 20, token);
        let task = tokio::spawn(monitor.run());

        let (probes_tx, probes_rx) = mpsc::unbounded_channel();
        let (roster_tx, roster_rx) = watch::channel(snapshot(connected));
        handle
            .start(roster_rx, Arc::new(RecordingProber { tx: probes_tx }))
            .await
            .unwrap();

        Fixture {
            handle,
            coordinator_rx,
            probes_rx,
            roster_tx,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_unit_replies_var_ready() {
        let (coordinator_tx, mut coordinator_rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let coordinator = ActorHandle::new(coordinator_tx, token.clone(), "coordinator");
        let (monitor, handle) = LivenessMonitor::new(config(), coordinator, 20, token);
        let task = tokio::spawn(monitor.run());

        handle.prepare_unit(2).await.unwrap();
        assert!(matches!(
            coordinator_rx.recv().await,
            Some(FleetMessage::VarReady { unit_id: 2 })
        ));

        let state = handle.state().await.unwrap();
        assert_eq!(state.phase, LivenessPhase::WaitingForRoster);
        assert_eq!(state.missed.get(&2), Some(&0));

        handle.quit().await.unwrap();
        assert_eq!(task.await.unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_skips_disconnected_and_is_sequential() {
        let mut fx = start(&[true, false, true]).await;
        let started = Instant::now();

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        assert!(started.elapsed() >= Duration::from_secs(15));

        // No second probe while unit 1 has not answered.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), fx.probes_rx.recv())
                .await
                .is_err()
        );
        assert_eq!(fx.handle.state().await.unwrap().in_flight, Some(1));

        fx.handle.probe_response(1).await.unwrap();
        assert_eq!(fx.probes_rx.recv().await, Some(3));
        fx.handle.probe_response(3).await.unwrap();

        // Next round starts one period later, from the top.
        assert_eq!(fx.probes_rx.recv().await, Some(1));
        assert!(fx.coordinator_rx.try_recv().is_err());

        fx.handle.quit().await.unwrap();
        assert_eq!(fx.task.await.unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_missed_probes_report_unreachable_once() {
        let mut fx = start(&[true]).await;
        let started = Instant::now();

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        assert!(matches!(
            fx.coordinator_rx.recv().await,
            Some(FleetMessage::MissedProbes {
                unit_id: 1,
                count: 1
            })
        ));

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        assert!(matches!(
            fx.coordinator_rx.recv().await,
            Some(FleetMessage::MissedProbes {
                unit_id: 1,
                count: 2
            })
        ));
        assert!(matches!(
            fx.coordinator_rx.recv().await,
            Some(FleetMessage::Unreachable { unit_id: 1 })
        ));
        assert!(started.elapsed() >= Duration::from_secs(40));

        // The unit is never probed or reported again.
        let quiet = tokio::time::timeout(Duration::from_secs(60), fx.coordinator_rx.recv()).await;
        assert!(quiet.is_err());
        assert!(fx.probes_rx.try_recv().is_err());

        fx.handle.quit().await.unwrap();
        fx.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_resets_missed_count() {
        let mut fx = start(&[true]).await;

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        assert!(matches!(
            fx.coordinator_rx.recv().await,
            Some(FleetMessage::MissedProbes { count: 1, .. })
        ));

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        fx.handle.probe_response(1).await.unwrap();
        assert!(matches!(
            fx.coordinator_rx.recv().await,
            Some(FleetMessage::MissedProbes {
                unit_id: 1,
                count: 0
            })
        ));

        let state = fx.handle.state().await.unwrap();
        assert_eq!(state.missed.get(&1), Some(&0));
        assert_eq!(state.phase, LivenessPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_updates_are_seen_next_round() {
        let mut fx = start(&[true, true]).await;

        assert_eq!(fx.probes_rx.recv().await, Some(1));
        fx.roster_tx.send_replace(snapshot(&[true, false]));
        fx.handle.probe_response(1).await.unwrap();

        // Unit 2 went away before its turn.
        let next = tokio::time::timeout(Duration::from_secs(1), fx.probes_rx.recv()).await;
        assert!(next.is_err());
        assert_eq!(fx.handle.state().await.unwrap().phase, LivenessPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_stops_probing() {
        let mut fx = start(&[true]).await;
        fx.handle.suspend().await.unwrap();

        let probe = tokio::time::timeout(Duration::from_secs(60), fx.probes_rx.recv()).await;
        assert!(probe.is_err());
        assert_eq!(
            fx.handle.state().await.unwrap().phase,
            LivenessPhase::WaitingForRoster
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let (coordinator_tx, _coordinator_rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let coordinator = ActorHandle::new(coordinator_tx, token.clone(), "coordinator");
        let (monitor, _handle) = LivenessMonitor::new(config(), coordinator, 20, token.clone());
        let task = tokio::spawn(monitor.run());

        token.cancel();
        assert_eq!(task.await.unwrap(), ActorOutcome::Cancelled);
    }
}
