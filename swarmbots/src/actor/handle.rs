//! Mailbox handles shared by the coordinator and the liveness monitor.
//!
//! The two actors send to each other, so their sends wait for mailbox room
//! for at most [`DEFAULT_SEND_TIMEOUT`]. Link tasks are never sent to and
//! use [`ActorHandle::deliver`], which waits as long as the actor runs.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest time a send waits for mailbox room.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Actor has stopped")]
    ActorStopped,
    #[error("Mailbox is full")]
    MailboxFull,
    #[error("Mailbox stayed full for the whole send timeout")]
    Timeout,
}

/// How an actor's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Stopped on request (`Quit`) or because every sender was dropped.
    Stopped,
    /// The cancellation token fired.
    Cancelled,
    /// The actor ran out of work, such as a link whose socket closed.
    Completed,
}

pub struct ActorHandle<M> {
    sender: mpsc::Sender<M>,
    cancellation_token: CancellationToken,
    name: &'static str,
}

impl<M> ActorHandle<M> {
    /// `cancellation_token` is the token of the actor behind the mailbox.
    pub fn new(
        sender: mpsc::Sender<M>,
        cancellation_token: CancellationToken,
        name: &'static str,
    ) -> Self {
        Self {
            sender,
            cancellation_token,
            name,
        }
    }

    pub async fn send(&self, msg: M) -> Result<(), SendError> {
        self.send_timeout(msg, DEFAULT_SEND_TIMEOUT).await
    }

    pub async fn send_timeout(&self, msg: M, timeout: Duration) -> Result<(), SendError> {
        if self.cancellation_token.is_cancelled() {
            return Err(SendError::ActorStopped);
        }

        let msg = match self.sender.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(SendError::ActorStopped),
            Err(TrySendError::Full(msg)) => msg,
        };

        debug!(actor = self.name, "Mailbox full, waiting for room");
        match tokio::time::timeout(timeout, self.sender.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(msg);
                Ok(())
            }
            Ok(Err(_)) => Err(SendError::ActorStopped),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Wait for mailbox room for as long as the receiving actor runs.
    ///
    /// Only for producers the receiver never sends back to.
    pub async fn deliver(&self, msg: M) -> Result<(), SendError> {
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(SendError::ActorStopped),
            sent = self.sender.send(msg) => sent.map_err(|_| SendError::ActorStopped),
        }
    }

    /// Send without waiting; a full mailbox is an error.
    pub fn try_send(&self, msg: M) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::MailboxFull,
            TrySendError::Closed(_) => SendError::ActorStopped,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.cancellation_token.is_cancelled()
    }
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            cancellation_token: self.cancellation_token.clone(),
            name: self.name,
        }
    }
}

impl<M> fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.name)
            .field("free_slots", &self.sender.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}
