//! Hub actor implementation
//!
//! The single serialization point of the system: owns the session registry
//! and presence records, routes messages and fans out presence snapshots.
//! Uses the Actor pattern with mpsc channels for message passing, so no
//! state is ever shared between tasks.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{AppError, EnqueueError};
use crate::mailbox::Mailbox;
use crate::message::{ChatMessage, ErrorCode, PresenceEntry, ServerMessage};
use crate::presence::PresenceBook;
use crate::session::{Session, SessionRegistry};
use crate::types::{ConnectionId, UserId};

/// Commands sent from connections to the hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Authenticated connection is ready to receive frames
    Connect {
        user_id: UserId,
        connection_id: ConnectionId,
        mailbox: Mailbox,
    },
    /// Persisted message to route
    Route { message: ChatMessage },
    /// Frame for one specific connection (e.g. a history page)
    Deliver {
        user_id: UserId,
        connection_id: ConnectionId,
        message: ServerMessage,
    },
    /// Connection went away
    Disconnect {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    /// Read the current presence snapshot
    Snapshot {
        reply: oneshot::Sender<Vec<PresenceEntry>>,
    },
}

/// Cloneable sender side of the hub's command channel
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.sender.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }

    pub async fn connect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        mailbox: Mailbox,
    ) -> Result<(), AppError> {
        self.send(HubCommand::Connect {
            user_id,
            connection_id,
            mailbox,
        })
        .await
    }

    /// Submit a persisted message. Waits while the hub's queue is full.
    pub async fn route(&self, message: ChatMessage) -> Result<(), AppError> {
        self.send(HubCommand::Route { message }).await
    }

    pub async fn deliver(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), AppError> {
        self.send(HubCommand::Deliver {
            user_id,
            connection_id,
            message,
        })
        .await
    }

    pub async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), AppError> {
        self.send(HubCommand::Disconnect {
            user_id,
            connection_id,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Vec<PresenceEntry>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| AppError::ChannelSend)
    }
}

/// The hub actor
///
/// Processes one command at a time, start to finish. Never waits on a
/// client: every mailbox write is a non-blocking enqueue.
pub struct Hub {
    /// Connected users: UserId -> live Session
    sessions: SessionRegistry,
    /// Every user seen so far, online or not
    presence: PresenceBook,
    /// Frames dropped because a mailbox was full
    dropped_frames: u64,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a new Hub with the given command receiver
    pub fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            presence: PresenceBook::new(),
            dropped_frames: 0,
            receiver,
        }
    }

    /// Create a hub and its handle, with a command queue of `capacity`
    pub fn channel(capacity: usize) -> (HubHandle, Hub) {
        let (sender, receiver) = mpsc::channel(capacity);
        (HubHandle { sender }, Hub::new(receiver))
    }

    /// Run the hub event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Connect {
                user_id,
                connection_id,
                mailbox,
            } => self.handle_connect(user_id, connection_id, mailbox),
            HubCommand::Route { message } => self.handle_route(message),
            HubCommand::Deliver {
                user_id,
                connection_id,
                message,
            } => self.handle_deliver(&user_id, connection_id, message),
            HubCommand::Disconnect {
                user_id,
                connection_id,
            } => self.handle_disconnect(user_id, connection_id),
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.presence.snapshot());
            }
        }
    }

    /// Register a new connection, superseding any previous one for the user
    fn handle_connect(&mut self, user_id: UserId, connection_id: ConnectionId, mailbox: Mailbox) {
        info!("User {} connected ({})", user_id, connection_id);

        let session = Session::new(connection_id, mailbox);
        if let Some(previous) = self.sessions.register(user_id.clone(), session) {
            info!(
                "Connection {} of {} superseded by {}",
                previous.connection_id, user_id, connection_id
            );
            // Dropping the old mailbox afterwards ends its sender task
            let _ = previous.mailbox.enqueue(ServerMessage::Error {
                code: ErrorCode::Superseded,
                message: "Signed in from another connection".to_string(),
            });
        }

        self.presence.mark_online(&user_id);
        self.broadcast_presence();

        debug!(
            "Connected users: {}, known users: {}",
            self.sessions.len(),
            self.presence.len()
        );
    }

    /// Route a persisted message to its recipient and echo it to the sender
    fn handle_route(&mut self, message: ChatMessage) {
        debug!("Routing message {} from {} to {}", message.id, message.from, message.to);

        self.presence.set_preview(&message.to, &message.content);

        if self.sessions.contains(&message.to) {
            self.send_to(&message.to, ServerMessage::Message(message.clone()));
        } else {
            debug!("Recipient {} offline, message stored only", message.to);
        }

        // Echo to sender (once, when writing to yourself)
        if message.from != message.to {
            let from = message.from.clone();
            self.send_to(&from, ServerMessage::Message(message));
        }

        self.broadcast_presence();
    }

    /// Hand a frame to one particular connection, if it is still current
    fn handle_deliver(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) {
        if !self.sessions.is_current(user_id, connection_id) {
            debug!("Dropping {} frame for stale connection {}", message.kind(), connection_id);
            return;
        }
        self.send_to(user_id, message);
    }

    /// Tear down a connection
    ///
    /// Only the user's current connection is removed, so a late teardown
    /// from a superseded connection, or a repeated one, changes nothing.
    fn handle_disconnect(&mut self, user_id: UserId, connection_id: ConnectionId) {
        let Some(session) = self.sessions.remove_if_current(&user_id, connection_id) else {
            debug!(
                "Ignoring teardown of {} for {}: not the current connection",
                connection_id, user_id
            );
            return;
        };

        info!(
            "User {} disconnected ({}) after {:?}",
            user_id,
            connection_id,
            session.uptime()
        );
        self.presence.mark_offline(&user_id);
        self.broadcast_presence();

        debug!(
            "Connected users: {}, known users: {}, dropped frames: {}",
            self.sessions.len(),
            self.presence.len(),
            self.dropped_frames
        );
    }

    /// Send the full presence snapshot to every connected user
    fn broadcast_presence(&mut self) {
        let users = self.presence.snapshot();
        let recipients: Vec<UserId> = self.sessions.iter().map(|(id, _)| id.clone()).collect();

        for user_id in recipients {
            self.send_to(
                &user_id,
                ServerMessage::UserList {
                    users: users.clone(),
                },
            );
        }
    }

    /// Non-blocking enqueue onto a user's mailbox, applying the drop policy
    fn send_to(&mut self, user_id: &UserId, message: ServerMessage) {
        let Some(session) = self.sessions.get(user_id) else {
            return;
        };

        match session.mailbox.enqueue(message) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                self.dropped_frames += 1;
                warn!(
                    "Mailbox full for {} ({}), dropping frame",
                    user_id, session.connection_id
                );
            }
            Err(EnqueueError::Closed) => {
                debug!("Mailbox closed for {}, teardown pending", user_id);
            }
        }
    }
}
