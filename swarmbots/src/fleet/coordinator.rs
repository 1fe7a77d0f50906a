//! Fleet coordinator: owns the roster and sequences every unit's lifecycle.
//!
//! Roster walks (initialization, mode negotiation, disconnection) go in
//! ascending id order with exactly one unit in flight. The next unit is
//! only contacted after the current one answered or dropped.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Datelike, Local, Timelike};
use swarm_proto::{
    ClockTime, InboundEvent, OperatingMode, Peripheral, UnitEvent, UnitId, ser,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, trace, warn};

use super::events::FleetEvents;
use crate::actor::{
    ActorHandle, ActorOutcome, ConnectionEvent, FleetEvent, FleetMessage, FleetState,
};
use crate::config::{FleetConfig, RosterSource};
use crate::domain::{ConnectionState, Roster, RosterSnapshot};
use crate::link::{LinkContext, LinkTable, spawn_link};
use crate::liveness::{LivenessHandle, Prober};
use crate::logsink::LogSink;

/// Collaborators of the coordinator.
pub struct CoordinatorDeps {
    pub roster_source: Arc<dyn RosterSource>,
    pub log_sink: Arc<dyn LogSink>,
    pub liveness: LivenessHandle,
    pub events: FleetEvents,
}

pub struct FleetCoordinator {
    config: FleetConfig,
    state: FleetState,
    roster: Roster,
    roster_tx: watch::Sender<RosterSnapshot>,
    events: FleetEvents,
    roster_source: Arc<dyn RosterSource>,
    log_sink: Arc<dyn LogSink>,
    liveness: LivenessHandle,
    link_ctx: LinkContext,
    links: LinkTable,
    link_tasks: JoinSet<ActorOutcome>,
    mailbox: mpsc::Receiver<FleetMessage>,
    /// Roster index of the unit the current walk is waiting on.
    cursor: usize,
    pending_logs: Option<UnitId>,
    cancellation_token: CancellationToken,
}

impl FleetCoordinator {
    /// Create the coordinator mailbox. The handle is needed before the
    /// coordinator exists, since the liveness monitor reports to it.
    pub fn channel(
        capacity: usize,
        cancellation_token: CancellationToken,
    ) -> (ActorHandle<FleetMessage>, mpsc::Receiver<FleetMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ActorHandle::new(tx, cancellation_token, "coordinator"), rx)
    }

    pub fn new(
        config: FleetConfig,
        deps: CoordinatorDeps,
        handle: ActorHandle<FleetMessage>,
        mailbox: mpsc::Receiver<FleetMessage>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (roster_tx, _) = watch::channel(RosterSnapshot::default());
        let link_ctx = LinkContext {
            coordinator: handle,
            liveness: deps.liveness.clone(),
            connect_timeout: config.connect_timeout(),
            outbound_capacity: config.outbound_capacity,
        };

        Self {
            config,
            state: FleetState::Idle,
            roster: Roster::default(),
            roster_tx,
            events: deps.events,
            roster_source: deps.roster_source,
            log_sink: deps.log_sink,
            liveness: deps.liveness,
            link_ctx,
            links: LinkTable::new(),
            link_tasks: JoinSet::new(),
            mailbox,
            cursor: 0,
            pending_logs: None,
            cancellation_token,
        }
    }

    pub fn roster_receiver(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster_tx.subscribe()
    }

    pub async fn run(mut self) -> ActorOutcome {
        info!("Fleet coordinator starting");

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    info!("Fleet coordinator cancelled");
                    break ActorOutcome::Cancelled;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(FleetMessage::Quit) | None => break ActorOutcome::Stopped,
                    Some(msg) => self.handle_message(msg).await,
                },

                Some(joined) = self.link_tasks.join_next(), if !self.link_tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Link task failed");
                    }
                }
            }
        };

        self.links.close_all();
        self.link_tasks.shutdown().await;
        info!(?outcome, state = %self.state, "Fleet coordinator stopped");
        outcome
    }

    async fn handle_message(&mut self, msg: FleetMessage) {
        trace!(state = %self.state, ?msg, "Coordinator message");
        match msg {
            FleetMessage::AskInit => self.on_ask_init().await,
            FleetMessage::Connection(event) => self.on_connection_event(event).await,
            FleetMessage::VarReady { unit_id } => self.on_var_ready(unit_id).await,
            FleetMessage::MissedProbes { unit_id, count } => {
                if let Some(unit) = self.roster.get_mut(unit_id) {
                    unit.missed_probe_count = count;
                    self.publish_roster();
                }
            }
            FleetMessage::Unreachable { unit_id } => {
                if let Some(link) = self.links.get(unit_id) {
                    link.close();
                }
                self.on_unit_gone(unit_id, "Unit stopped answering probes")
                    .await;
            }
            FleetMessage::Unit(event) => self.on_unit_event(event).await,
            FleetMessage::Acknowledge => {
                if self.state == FleetState::WaitingForPopupAck {
                    self.state = FleetState::Available;
                } else {
                    debug!(state = %self.state, "Nothing to acknowledge");
                }
            }
            FleetMessage::DisconnectAll => self.begin_disconnection().await,
            FleetMessage::GetState(reply) => {
                let _ = reply.send(self.state);
            }
            FleetMessage::Quit => {}
            request => self.on_operator_request(request).await,
        }
    }

    // ----- initialization -------------------------------------------------

    async fn on_ask_init(&mut self) {
        if !matches!(self.state, FleetState::Idle | FleetState::Stopped) {
            debug!(state = %self.state, "Ignoring init request");
            return;
        }

        self.links.close_all();
        self.pending_logs = None;
        let entries = match self.roster_source.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to load roster, continuing without units");
                Vec::new()
            }
        };
        self.roster = Roster::from_entries(&entries);
        self.config.check_probe_budget(self.roster.len());
        self.publish_roster();

        if self.roster.is_empty() {
            info!("Roster is empty, nothing to initialize");
            self.state = FleetState::Idle;
            self.events.publish(FleetEvent::InitReady);
            return;
        }

        info!(units = self.roster.len(), "Initializing fleet");
        self.cursor = 0;
        self.connect_current();
    }

    fn connect_current(&mut self) {
        let Some(unit) = self.roster.at(self.cursor) else {
            return;
        };
        debug!(unit_id = unit.id, address = %unit.address, "Opening unit link");
        let link = spawn_link(
            unit,
            &self.link_ctx,
            &self.cancellation_token,
            &mut self.link_tasks,
        );
        if let Some(stale) = self.links.insert(link) {
            stale.close();
        }
        self.state = FleetState::WaitingForConnection;
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        let unit_id = event.unit_id();
        let in_flight = self.current_id() == Some(unit_id);

        match event {
            ConnectionEvent::Established { .. } => {
                if self.state != FleetState::WaitingForConnection || !in_flight {
                    debug!(unit_id, state = %self.state, "Ignoring late connection");
                    return;
                }
                self.roster.set_connection(unit_id, ConnectionState::Connected);
                self.publish_roster();
                self.log_sink.log(unit_id, Level::INFO, "Connected");
                self.events.publish(FleetEvent::UnitConnected { unit_id });

                self.state = FleetState::WaitingForVarReady;
                if let Err(e) = self.liveness.prepare_unit(unit_id).await {
                    warn!(unit_id, error = %e, "Liveness monitor unavailable");
                    self.advance_init().await;
                }
            }
            ConnectionEvent::Failed { .. } => {
                if self.state != FleetState::WaitingForConnection || !in_flight {
                    debug!(unit_id, state = %self.state, "Ignoring connection failure");
                    return;
                }
                self.roster
                    .set_connection(unit_id, ConnectionState::Disconnected);
                self.publish_roster();
                self.log_sink.log(unit_id, Level::WARN, "Connection failed");
                self.advance_init().await;
            }
            ConnectionEvent::Lost { .. } => {
                self.on_unit_gone(unit_id, "Connection lost").await;
            }
        }
    }

    async fn on_var_ready(&mut self, unit_id: UnitId) {
        if self.state != FleetState::WaitingForVarReady || self.current_id() != Some(unit_id) {
            debug!(unit_id, state = %self.state, "Ignoring var ready");
            return;
        }

        if self.config.sync_clock {
            self.send_to(unit_id, ser::encode_set_clock(local_clock()))
                .await;
        }
        self.advance_init().await;
    }

    async fn advance_init(&mut self) {
        self.cursor += 1;
        if self.cursor < self.roster.len() {
            self.connect_current();
        } else {
            self.finish_init().await;
        }
    }

    async fn finish_init(&mut self) {
        self.publish_roster();
        let prober: Arc<dyn Prober> = Arc::new(self.links.clone());
        if let Err(e) = self
            .liveness
            .start(self.roster_tx.subscribe(), prober)
            .await
        {
            warn!(error = %e, "Failed to start liveness probing");
        }

        self.state = FleetState::Available;
        info!(
            connected = self.roster.connected_ids().len(),
            units = self.roster.len(),
            "Fleet initialized"
        );
        self.events.publish(FleetEvent::InitReady);
    }

    // ----- unit traffic ---------------------------------------------------

    async fn on_unit_event(&mut self, event: UnitEvent) {
        let unit_id = event.unit_id;
        if self.roster.get(unit_id).is_none() {
            debug!(unit_id, "Event from unknown unit");
            return;
        }

        match event.event {
            InboundEvent::Mode(mode) => self.on_mode_report(unit_id, mode).await,
            InboundEvent::Logs(lines) => {
                if self.pending_logs != Some(unit_id) {
                    debug!(unit_id, lines = lines.len(), "Dropping unrequested logs");
                    return;
                }
                self.pending_logs = None;
                self.log_sink.unit_logs(unit_id, &lines);
                self.send_to(unit_id, ser::encode_logs_received()).await;
                self.events
                    .publish(FleetEvent::LogsReady { unit_id, lines });
            }
            InboundEvent::Alert { code } => {
                self.log_sink
                    .log(unit_id, Level::WARN, &format!("Alert {} raised", code));
                self.events.publish(FleetEvent::Alert { unit_id, code });
            }
            InboundEvent::Radar(obstacle) => {
                if let Some(unit) = self.roster.get_mut(unit_id) {
                    unit.obstacle = obstacle;
                }
                self.publish_roster();
            }
            InboundEvent::DisconnectedOk => {
                if let Some(link) = self.links.get(unit_id) {
                    link.close();
                }
                self.on_unit_gone(unit_id, "Disconnection acknowledged")
                    .await;
            }
            InboundEvent::Availability | InboundEvent::Nothing => {}
        }
    }

    async fn on_mode_report(&mut self, unit_id: UnitId, mode: OperatingMode) {
        if let Some(unit) = self.roster.get_mut(unit_id) {
            unit.mode.replace(mode);
        }
        self.publish_roster();

        if self.state == FleetState::WaitingForModeNegotiation
            && self.current_id() == Some(unit_id)
        {
            self.step_mode_negotiation(self.cursor + 1).await;
        }
    }

    /// A unit left the fleet: socket lost, probes exhausted or disconnection
    /// acknowledged. Continues any walk that was waiting on it.
    async fn on_unit_gone(&mut self, unit_id: UnitId, reason: &str) {
        let was_selected = self.roster.selected() == Some(unit_id);
        let changed = self
            .roster
            .set_connection(unit_id, ConnectionState::Disconnected);

        if changed {
            info!(unit_id, reason, "Unit disconnected");
            self.log_sink.log(unit_id, Level::INFO, reason);
            self.publish_roster();
            self.events
                .publish(FleetEvent::UnitDisconnected { unit_id });
            if was_selected {
                self.events
                    .publish(FleetEvent::SelectionChanged { selected: None });
            }
        }
        if self.pending_logs == Some(unit_id) {
            self.pending_logs = None;
        }

        if self.current_id() == Some(unit_id) {
            match self.state {
                FleetState::WaitingForVarReady => return self.advance_init().await,
                FleetState::WaitingForModeNegotiation => {
                    return self.step_mode_negotiation(self.cursor + 1).await;
                }
                FleetState::WaitingForDisconnection => {
                    return self.step_disconnection(self.cursor + 1).await;
                }
                _ => {}
            }
        }

        if changed && self.state == FleetState::Available && self.config.confirm_disconnect {
            self.state = FleetState::WaitingForPopupAck;
        }
    }

    // ----- operator requests ----------------------------------------------

    async fn on_operator_request(&mut self, request: FleetMessage) {
        if self.state != FleetState::Available {
            debug!(state = %self.state, ?request, "Ignoring request");
            return;
        }

        match request {
            FleetMessage::Select(unit_id) => self.select(unit_id).await,
            FleetMessage::UnselectAll => self.unselect_all().await,
            FleetMessage::SetPeripheral {
                peripheral,
                enabled,
            } => {
                self.update_selected_mode(|mode| mode.set(peripheral, enabled))
                    .await;
            }
            FleetMessage::SetMode(new_mode) => {
                self.update_selected_mode(|mode| mode.replace(new_mode))
                    .await;
            }
            FleetMessage::BeginModeNegotiation => {
                info!("Starting mode negotiation");
                self.step_mode_negotiation(0).await;
            }
            FleetMessage::Drive(direction) => match self.roster.selected() {
                Some(unit_id) => {
                    self.send_to(unit_id, ser::encode_ask_command(direction))
                        .await;
                }
                None => debug!(?direction, "No unit selected"),
            },
            FleetMessage::RequestLogs(unit_id) => {
                if let Some(pending) = self.pending_logs {
                    debug!(unit_id, pending, "Log request already in flight");
                    return;
                }
                let connected = self
                    .roster
                    .get(unit_id)
                    .is_some_and(|unit| unit.is_connected());
                if connected && self.send_to(unit_id, ser::encode_ask_logs()).await {
                    self.pending_logs = Some(unit_id);
                } else {
                    debug!(unit_id, "Cannot request logs");
                }
            }
            other => debug!(?other, "Unhandled request"),
        }
    }

    async fn select(&mut self, unit_id: UnitId) {
        let Some(change) = self.roster.select(unit_id) else {
            debug!(unit_id, "Selection unchanged");
            return;
        };

        if let Some(previous) = change.previous {
            self.send_to(previous, ser::encode_set_selection(false))
                .await;
        }
        self.send_to(unit_id, ser::encode_set_selection(true)).await;
        self.publish_roster();
        self.events.publish(FleetEvent::SelectionChanged {
            selected: Some(unit_id),
        });
    }

    async fn unselect_all(&mut self) {
        let cameras: Vec<(UnitId, OperatingMode)> = self
            .roster
            .units()
            .iter()
            .filter(|unit| unit.mode.camera)
            .map(|unit| {
                let mut mode = unit.mode;
                mode.set(Peripheral::Camera, false);
                (unit.id, mode)
            })
            .collect();

        for (unit_id, mode) in cameras {
            if let Some(unit) = self.roster.get_mut(unit_id) {
                unit.mode = mode;
            }
            self.send_to(unit_id, ser::encode_set_mode(mode)).await;
        }

        if let Some(previous) = self.roster.unselect_all() {
            self.send_to(previous, ser::encode_set_selection(false))
                .await;
            self.events
                .publish(FleetEvent::SelectionChanged { selected: None });
        }
        self.publish_roster();
    }

    async fn update_selected_mode(&mut self, update: impl FnOnce(&mut OperatingMode)) {
        let Some(unit_id) = self.roster.selected() else {
            debug!("No unit selected");
            return;
        };
        let Some(unit) = self.roster.get_mut(unit_id) else {
            return;
        };
        update(&mut unit.mode);
        let mode = unit.mode;

        self.send_to(unit_id, ser::encode_set_mode(mode)).await;
        self.publish_roster();
    }

    // ----- mode negotiation -----------------------------------------------

    /// Ask the next connected unit at or after `from` for its mode.
    async fn step_mode_negotiation(&mut self, from: usize) {
        let mut next = self.roster.next_connected(from);
        while let Some(index) = next {
            let unit_id = self.roster.units()[index].id;
            if self.send_to(unit_id, ser::encode_ask_mode()).await {
                self.cursor = index;
                self.state = FleetState::WaitingForModeNegotiation;
                return;
            }
            next = self.roster.next_connected(index + 1);
        }
        self.finish_mode_negotiation().await;
    }

    async fn finish_mode_negotiation(&mut self) {
        if let Some(endpoint) = self.config.stream_endpoint.clone() {
            match ser::encode_setup_info_str(&endpoint.ip, endpoint.port) {
                Ok(frame) => {
                    for unit_id in self.roster.connected_ids() {
                        self.send_to(unit_id, frame.clone()).await;
                    }
                }
                Err(e) => warn!(error = %e, "Invalid stream endpoint"),
            }
        }

        self.state = FleetState::Available;
        info!("Mode negotiation complete");
        self.events.publish(FleetEvent::ModeReady);
    }

    // ----- disconnection --------------------------------------------------

    async fn begin_disconnection(&mut self) {
        if matches!(
            self.state,
            FleetState::Stopped | FleetState::WaitingForDisconnection
        ) {
            debug!(state = %self.state, "Disconnection already done or under way");
            return;
        }

        info!("Disconnecting fleet");
        if let Err(e) = self.liveness.suspend().await {
            warn!(error = %e, "Failed to suspend liveness probing");
        }
        self.step_disconnection(0).await;
    }

    /// Ask the next connected unit at or after `from` to disconnect.
    async fn step_disconnection(&mut self, from: usize) {
        let mut next = self.roster.next_connected(from);
        while let Some(index) = next {
            let unit_id = self.roster.units()[index].id;
            if self.send_to(unit_id, ser::encode_ask_disconnect()).await {
                self.cursor = index;
                self.state = FleetState::WaitingForDisconnection;
                return;
            }
            next = self.roster.next_connected(index + 1);
        }

        self.links.close_all();
        self.state = FleetState::Stopped;
        info!("Fleet disconnected");
        self.events.publish(FleetEvent::DisconnectionComplete);
    }

    // ----- helpers --------------------------------------------------------

    fn current_id(&self) -> Option<UnitId> {
        self.roster.at(self.cursor).map(|unit| unit.id)
    }

    async fn send_to(&self, unit_id: UnitId, frame: Bytes) -> bool {
        let sent = match self.links.get(unit_id) {
            Some(link) => link.send_frame(frame).await,
            None => false,
        };
        if !sent {
            trace!(unit_id, "Frame dropped");
        }
        sent
    }

    fn publish_roster(&self) {
        self.roster_tx.send_replace(self.roster.snapshot());
    }
}

fn local_clock() -> ClockTime {
    let now = Local::now();
    ClockTime {
        year: now.year() as u16,
        month: now.month() as u8,
        day: now.day() as u8,
        hour: now.hour() as u8,
        minute: now.minute() as u8,
        second: now.second() as u8,
    }
}
