//! Connection actor: owns one unit's socket and its outbound queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use swarm_proto::{FrameCodec, UnitId};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::actor::{ActorOutcome, ConnectionEvent};
use crate::domain::UnitAddress;

/// Capacity of the lifecycle event channel of a link.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

struct LinkShared {
    unit_id: UnitId,
    connected: AtomicBool,
    reader: Mutex<Option<OwnedReadHalf>>,
    events: broadcast::Sender<ConnectionEvent>,
    cancellation_token: CancellationToken,
}

impl LinkShared {
    fn notify(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Publish `Lost` once, then wind the link down.
    fn mark_lost(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(unit_id = self.unit_id, "Unit link lost");
            self.notify(ConnectionEvent::Lost {
                unit_id: self.unit_id,
            });
        }
        self.cancellation_token.cancel();
    }
}

/// Cloneable handle to a unit link.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<LinkShared>,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    pub fn unit_id(&self) -> UnitId {
        self.shared.unit_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Subscribe to lifecycle events. Only events published after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancellation_token.clone()
    }

    /// Queue a frame for the unit.
    ///
    /// Waits while the queue is full. Frames for a link that is not
    /// connected are dropped and `false` is returned.
    pub async fn send_frame(&self, frame: Bytes) -> bool {
        if !self.is_connected() {
            trace!(unit_id = self.unit_id(), "Dropping frame, unit not connected");
            return false;
        }
        self.outbound.send(frame).await.is_ok()
    }

    /// Read exactly `n` bytes from the unit.
    ///
    /// On end of stream or I/O error the link is marked lost and the bytes
    /// read so far are returned, so the result may be shorter than `n`.
    pub async fn read(&self, n: usize) -> Bytes {
        let mut guard = self.shared.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Bytes::new();
        };

        let mut buf = vec![0u8; n];
        let mut filled = 0;
        let mut lost = false;
        while filled < n {
            let result = tokio::select! {
                biased;
                _ = self.shared.cancellation_token.cancelled() => break,
                result = reader.read(&mut buf[filled..]) => result,
            };
            match result {
                Ok(0) => {
                    debug!(unit_id = self.unit_id(), "Unit closed the stream");
                    lost = true;
                    break;
                }
                Ok(read) => filled += read,
                Err(e) => {
                    warn!(unit_id = self.unit_id(), error = %e, "Read from unit failed");
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            guard.take();
            drop(guard);
            self.shared.mark_lost();
        }
        buf.truncate(filled);
        Bytes::from(buf)
    }

    /// Treat the link as lost: publishes `Lost` if it was connected.
    pub fn mark_lost(&self) {
        self.shared.mark_lost();
    }

    /// Close the link without publishing `Lost`. Later frames are dropped.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.cancellation_token.cancel();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("unit_id", &self.unit_id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Connects once, then writes queued frames until the link ends.
pub struct ConnectionActor {
    shared: Arc<LinkShared>,
    address: UnitAddress,
    connect_timeout: Duration,
    outbound: mpsc::Receiver<Bytes>,
}

impl ConnectionActor {
    pub fn new(
        unit_id: UnitId,
        address: UnitAddress,
        connect_timeout: Duration,
        outbound_capacity: usize,
        cancellation_token: CancellationToken,
    ) -> (Self, ConnectionHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let shared = Arc::new(LinkShared {
            unit_id,
            connected: AtomicBool::new(false),
            reader: Mutex::new(None),
            events,
            cancellation_token,
        });

        let actor = Self {
            shared: shared.clone(),
            address,
            connect_timeout,
            outbound: outbound_rx,
        };
        let handle = ConnectionHandle {
            shared,
            outbound: outbound_tx,
        };
        (actor, handle)
    }

    pub async fn run(mut self) -> ActorOutcome {
        let unit_id = self.shared.unit_id;
        debug!(unit_id, address = %self.address, "Connecting to unit");

        let connect = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.address.host.as_str(), self.address.port)),
        );
        let stream = tokio::select! {
            biased;
            _ = self.shared.cancellation_token.cancelled() => return ActorOutcome::Cancelled,
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(unit_id, address = %self.address, error = %e, "Connection to unit failed");
                    self.shared.notify(ConnectionEvent::Failed { unit_id });
                    return ActorOutcome::Completed;
                }
                Err(_) => {
                    warn!(
                        unit_id,
                        address = %self.address,
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        "Connection to unit timed out"
                    );
                    self.shared.notify(ConnectionEvent::Failed { unit_id });
                    return ActorOutcome::Completed;
                }
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(unit_id, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        *self.shared.reader.lock().await = Some(read_half);
        self.shared.connected.store(true, Ordering::Release);
        info!(unit_id, address = %self.address, "Unit link established");
        self.shared.notify(ConnectionEvent::Established { unit_id });

        let mut sink = FramedWrite::new(write_half, FrameCodec);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shared.cancellation_token.cancelled() => {
                    break if self.shared.connected.load(Ordering::Acquire) {
                        ActorOutcome::Cancelled
                    } else {
                        ActorOutcome::Completed
                    };
                }
                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        trace!(unit_id, len = frame.len(), "Writing frame");
                        if let Err(e) = sink.send(frame).await {
                            warn!(unit_id, error = %e, "Write to unit failed");
                            self.shared.mark_lost();
                            break ActorOutcome::Completed;
                        }
                    }
                    None => break ActorOutcome::Stopped,
                }
            }
        };

        self.shared.connected.store(false, Ordering::Release);
        self.shared.reader.lock().await.take();
        debug!(unit_id, ?outcome, "Connection actor finished");
        outcome
    }
}
