//! Outbound mailbox
//!
//! Bounded per-connection queue between the hub and one client, plus the
//! sender task that drains it. A slow client only ever fills its own
//! mailbox: the hub enqueues without waiting and drops the new frame when
//! the mailbox is full.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::error::{AppError, EnqueueError};
use crate::message::ServerMessage;
use crate::transport::FrameSender;

/// Hub-side handle of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<ServerMessage>,
}

/// Sender-task side of a connection's outbound queue
pub type Outbox = mpsc::Receiver<ServerMessage>;

impl Mailbox {
    /// Create a mailbox holding at most `capacity` pending frames
    pub fn channel(capacity: usize) -> (Mailbox, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Mailbox { sender }, receiver)
    }

    /// Enqueue without waiting
    ///
    /// When the mailbox is full the frame passed in is dropped and
    /// [`EnqueueError::Full`] is returned. Frames already queued are kept.
    pub fn enqueue(&self, msg: ServerMessage) -> Result<(), EnqueueError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Whether the sender task has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Drain `outbox` into `sink` until the hub drops the mailbox or a send fails
///
/// Each write is bounded by `send_timeout`, and so is closing the sink on
/// the way out. A peer that stopped reading can stall the close handshake
/// as well.
pub async fn run_sender<T>(
    mut outbox: Outbox,
    mut sink: T,
    send_timeout: Duration,
) -> Result<(), AppError>
where
    T: FrameSender,
{
    let result = loop {
        let Some(msg) = outbox.recv().await else {
            debug!("Mailbox released, ending sender task");
            break Ok(());
        };

        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {} frame: {}", msg.kind(), e);
                // Continue - don't break on serialization errors
                continue;
            }
        };

        match timeout(send_timeout, sink.send(json)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break Err(e),
            Err(_) => break Err(AppError::SendTimeout),
        }
    };

    if timeout(send_timeout, sink.close()).await.is_err() {
        debug!("Close did not complete within {:?}, dropping sink", send_timeout);
    }
    result
}
