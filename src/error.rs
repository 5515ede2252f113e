//! Error types for the hub
//!
//! Defines connection-fatal errors, collaborator errors and mailbox
//! enqueue errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Connection-level errors
///
/// Every variant is fatal to the single connection it occurred on and
/// triggers teardown. None of them ever stops the hub itself.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol or transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (the hub actor is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// Client sent a frame that is not part of the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Upgrade request was not authenticated
    #[error("Handshake rejected: {0}")]
    Rejected(#[from] AuthError),

    /// The adapter already reported closure
    #[error("Connection closed")]
    Closed,

    /// A single frame write did not finish in time
    #[error("Send timed out")]
    SendTimeout,
}

/// Message store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend refused or failed the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Identity/session provider errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No session token on the upgrade request
    #[error("Missing session token")]
    MissingToken,

    /// Unknown, revoked or expired session
    #[error("Invalid or expired session")]
    InvalidSession,

    /// Origin header not allowed
    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    /// Sessions file could not be read
    #[error("Failed to read sessions file: {0}")]
    SessionsFile(#[from] std::io::Error),

    /// Sessions file is not a JSON object of token -> user id
    #[error("Malformed sessions file: {0}")]
    SessionsFormat(#[from] serde_json::Error),
}

/// Mailbox enqueue errors
///
/// Returned by the non-blocking enqueue the hub uses; the frame is
/// already dropped when either variant is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Mailbox is at capacity
    #[error("Mailbox full")]
    Full,

    /// The sender task has gone away
    #[error("Mailbox closed")]
    Closed,
}
