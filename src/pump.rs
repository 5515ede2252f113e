//! Inbound pump
//!
//! One per connection. Reads frames, stamps and persists chat messages,
//! and hands them to the hub. Never touches hub state directly.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{AppError, StoreError};
use crate::hub::HubHandle;
use crate::message::{ChatMessage, ClientMessage, ErrorCode, ServerMessage};
use crate::store::{self, MessageStore};
use crate::transport::FrameReceiver;
use crate::types::{ConnectionId, UserId};

/// What happened to one inbound frame
#[derive(Debug)]
pub enum Ingest {
    /// Persisted and handed to the hub
    Routed(ChatMessage),
    /// Could not be persisted; not routed, no echo
    PersistFailed(StoreError),
    /// History page sent back to this connection
    History { with: UserId, count: usize },
    /// History lookup failed; the client got an error frame
    HistoryFailed(StoreError),
}

pub struct InboundPump {
    user_id: UserId,
    connection_id: ConnectionId,
    store: Arc<dyn MessageStore>,
    hub: HubHandle,
}

impl InboundPump {
    pub fn new(
        user_id: UserId,
        connection_id: ConnectionId,
        store: Arc<dyn MessageStore>,
        hub: HubHandle,
    ) -> Self {
        Self {
            user_id,
            connection_id,
            store,
            hub,
        }
    }

    /// Read frames until the peer closes
    ///
    /// Returns an error on transport failure or protocol violation; either
    /// way the caller tears the connection down.
    pub async fn run<R>(self, mut receiver: R) -> Result<(), AppError>
    where
        R: FrameReceiver,
    {
        while let Some(text) = receiver.receive().await? {
            match self.ingest(&text).await {
                Ok(Ingest::Routed(msg)) => {
                    debug!("Routed {} from {} to {}", msg.id, msg.from, msg.to);
                }
                Ok(Ingest::PersistFailed(e)) => {
                    error!("Dropping message from {}: persist failed: {}", self.user_id, e);
                }
                Ok(Ingest::History { with, count }) => {
                    debug!("Sent {} history messages with {} to {}", count, with, self.user_id);
                }
                Ok(Ingest::HistoryFailed(e)) => {
                    error!("History lookup for {} failed: {}", self.user_id, e);
                }
                Err(e) => {
                    warn!("Closing connection {} of {}: {}", self.connection_id, self.user_id, e);
                    return Err(e);
                }
            }
        }

        debug!("Peer {} closed connection {}", self.user_id, self.connection_id);
        Ok(())
    }

    /// Handle one text frame
    ///
    /// `Err` is fatal to the connection (protocol violation, or the hub is
    /// gone). A store failure is not: it comes back as an `Ingest` value.
    pub async fn ingest(&self, text: &str) -> Result<Ingest, AppError> {
        match ClientMessage::parse(text)? {
            ClientMessage::Message { to, content } => {
                let message = ChatMessage::stamp(self.user_id.clone(), to, content);

                if let Err(e) = self.store.save(&message).await {
                    return Ok(Ingest::PersistFailed(e));
                }

                // Waits while the hub's queue is full
                self.hub.route(message.clone()).await?;
                Ok(Ingest::Routed(message))
            }
            ClientMessage::History { with, offset } => {
                let page =
                    store::history_page(self.store.as_ref(), &self.user_id, &with, offset).await;
                let messages = match page {
                    Ok(messages) => messages,
                    Err(e) => {
                        self.reply(ServerMessage::Error {
                            code: ErrorCode::Internal,
                            message: "Failed to fetch messages".to_string(),
                        })
                        .await?;
                        return Ok(Ingest::HistoryFailed(e));
                    }
                };

                let count = messages.len();
                self.reply(ServerMessage::History {
                    with: with.clone(),
                    offset,
                    messages,
                })
                .await?;
                Ok(Ingest::History { with, count })
            }
        }
    }

    /// Send a frame to this connection only, through the hub
    async fn reply(&self, message: ServerMessage) -> Result<(), AppError> {
        self.hub
            .deliver(self.user_id.clone(), self.connection_id, message)
            .await
    }
}
