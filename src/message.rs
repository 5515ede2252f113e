//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::UserId;

/// A persisted 1:1 chat message
///
/// Immutable once stamped. `from` and `sent_at` are always set by the hub,
/// never taken from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Stamp a new message with a fresh id and the current time
    pub fn stamp(from: UserId, to: UserId, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            content,
            sent_at: Utc::now(),
        }
    }

    /// Whether this message was exchanged between `a` and `b`, in either direction
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.from == a && &self.to == b) || (&self.from == b && &self.to == a)
    }
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Send a chat message to another user
    Message { to: UserId, content: String },
    /// Fetch a page of the conversation with another user
    History {
        with: UserId,
        #[serde(default)]
        offset: usize,
    },
}

impl ClientMessage {
    /// Decode a text frame
    ///
    /// Anything that does not decode, or names an empty peer, is a
    /// protocol violation.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let msg: ClientMessage =
            serde_json::from_str(text).map_err(|e| AppError::Protocol(e.to_string()))?;

        match &msg {
            ClientMessage::Message { to, .. } if to.is_empty() => {
                Err(AppError::Protocol("empty recipient".to_string()))
            }
            ClientMessage::History { with, .. } if with.is_empty() => {
                Err(AppError::Protocol("empty history peer".to_string()))
            }
            _ => Ok(msg),
        }
    }
}

/// One row of a presence snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub online: bool,
    pub last_message: String,
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Routed message, or its delivery echo to the sender
    Message(ChatMessage),
    /// Full presence snapshot
    UserList { users: Vec<PresenceEntry> },
    /// One page of conversation history, oldest first
    History {
        with: UserId,
        offset: usize,
        messages: Vec<ChatMessage>,
    },
    /// Error notification
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Another connection for the same user took over this session
    Superseded,
    /// The hub could not complete a request
    Internal,
}

impl ServerMessage {
    /// Short frame kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Message(_) => "message",
            ServerMessage::UserList { .. } => "user_list",
            ServerMessage::History { .. } => "history",
            ServerMessage::Error { .. } => "error",
        }
    }
}
