//! Presence and 1:1 message broadcast hub
//!
//! A WebSocket hub built with tokio-tungstenite using the Actor pattern
//! for state management.
//!
//! # Features
//! - Session-token authenticated WebSocket upgrade
//! - 1:1 messages, persisted before routing, with a delivery echo to the sender
//! - Presence roster (online flag + last message preview) pushed after every event
//! - Paged conversation history
//! - One connection per user; a new connection supersedes the old one
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning the session registry and presence records
//! - Each connection runs an inbound pump and a sender task around a bounded mailbox
//! - No locks needed - all hub state access goes through message passing
//! - A full mailbox drops new frames for that client only; the hub never waits on a client
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use presence_hub::{serve, ConnectionContext, Hub, MemoryStore, ServerConfig, SessionTable};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let (hub, actor) = Hub::channel(config.router_capacity);
//!
//!     tokio::spawn(actor.run());
//!
//!     let ctx = ConnectionContext::new(
//!         hub,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(SessionTable::new()),
//!         &config,
//!     );
//!     serve(listener, ctx).await;
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod mailbox;
pub mod message;
pub mod presence;
pub mod pump;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use auth::{IdentityProvider, SessionTable};
pub use config::ServerConfig;
pub use error::{AppError, AuthError, ConfigError, EnqueueError, StoreError};
pub use handler::{handle_connection, serve, serve_connection, ConnectionContext};
pub use hub::{Hub, HubCommand, HubHandle};
pub use mailbox::Mailbox;
pub use message::{ChatMessage, ClientMessage, ErrorCode, PresenceEntry, ServerMessage};
pub use presence::{PresenceBook, PresenceRecord};
pub use pump::{InboundPump, Ingest};
pub use session::{Session, SessionRegistry};
pub use store::{MemoryStore, MessageStore, HISTORY_PAGE_SIZE};
pub use types::{ConnectionId, UserId};
