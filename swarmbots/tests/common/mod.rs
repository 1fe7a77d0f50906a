//! Fake units and helpers shared by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use swarm_proto::{Command, FrameCodec, OperatingMode, decode_command, ser::unit};
use swarmbots::actor::FleetEvent;
use swarmbots::config::{FleetConfig, RosterEntry};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

/// How a fake unit answers requests on its own.
#[derive(Debug, Clone)]
pub struct UnitScript {
    pub answer_probes: bool,
    /// Mode reported on `AskMode`; `None` leaves the answer to the test.
    pub mode: Option<OperatingMode>,
    /// Lines sent on `AskLogs`; `None` leaves the answer to the test.
    pub logs: Option<Vec<String>>,
    pub ack_disconnect: bool,
}

impl Default for UnitScript {
    fn default() -> Self {
        Self {
            answer_probes: true,
            mode: Some(OperatingMode::default()),
            logs: Some(vec!["boot ok".to_string()]),
            ack_disconnect: true,
        }
    }
}

/// A unit listening on a local port. Records every request it receives.
pub struct FakeUnit {
    pub port: u16,
    commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl FakeUnit {
    pub async fn spawn(script: UnitScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut framed = Framed::new(stream, FrameCodec::new());

            loop {
                tokio::select! {
                    frame = framed.next() => {
                        let Some(Ok(frame)) = frame else { break };
                        let mut body = vec![0x00, frame.message_id];
                        body.extend_from_slice(&frame.payload);
                        let Some(command) = decode_command(&body) else { continue };

                        let reply = match &command {
                            Command::AskAvailability if script.answer_probes => {
                                Some(unit::encode_set_availability())
                            }
                            Command::AskMode => script.mode.map(unit::encode_set_mode),
                            Command::AskLogs => script.logs.as_deref().map(unit::encode_set_logs),
                            Command::AskDisconnect if script.ack_disconnect => {
                                Some(unit::encode_ack_disconnection())
                            }
                            _ => None,
                        };
                        let _ = commands_tx.send(command);
                        if let Some(reply) = reply
                            && framed.send(reply).await.is_err()
                        {
                            break;
                        }
                    }
                    bytes = outbound_rx.recv() => match bytes {
                        Some(bytes) => {
                            if framed.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        // The test dropped the unit: hang up.
                        None => break,
                    }
                }
            }
        });

        Self {
            port,
            commands,
            outbound,
        }
    }

    pub fn entry(&self, id: u16) -> RosterEntry {
        RosterEntry::new(id, "127.0.0.1", self.port)
    }

    /// Push a frame to the controller.
    pub fn push(&self, frame: Bytes) {
        self.outbound.send(frame).unwrap();
    }

    /// Next request other than an availability probe.
    pub async fn next_command(&mut self) -> Command {
        loop {
            let command = tokio::time::timeout(WAIT, self.commands.recv())
                .await
                .expect("timed out waiting for a command")
                .expect("fake unit stopped");
            if command != Command::AskAvailability {
                return command;
            }
        }
    }

    /// Wait until `matches` accepts a request, skipping the others.
    pub async fn wait_for(&mut self, matches: impl Fn(&Command) -> bool) -> Command {
        loop {
            let command = self.next_command().await;
            if matches(&command) {
                return command;
            }
        }
    }

    /// True if no request other than a probe arrives within `window`.
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.commands.recv()).await {
                Err(_) | Ok(None) => return true,
                Ok(Some(Command::AskAvailability)) => continue,
                Ok(_) => return false,
            }
        }
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Short timings so tests finish fast. Probing is slow unless a test opts in.
pub fn test_config() -> FleetConfig {
    FleetConfig {
        connect_timeout_ms: 500,
        probe_period_ms: 60_000,
        probe_timeout_ms: 1_000,
        ..FleetConfig::default()
    }
}

pub async fn wait_event(
    events: &mut broadcast::Receiver<FleetEvent>,
    matches: impl Fn(&FleetEvent) -> bool,
) -> FleetEvent {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for a fleet event")
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}
