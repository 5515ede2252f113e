//! WebSocket connection handler
//!
//! Handles individual client connections: authenticated WebSocket
//! handshake, then the per-connection lifecycle (inbound pump, sender
//! task, teardown) around the hub.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::auth::{self, IdentityProvider};
use crate::config::ServerConfig;
use crate::error::{AppError, AuthError};
use crate::hub::HubHandle;
use crate::mailbox::{self, Mailbox};
use crate::pump::InboundPump;
use crate::store::MessageStore;
use crate::transport::{self, FrameReceiver, FrameSender};
use crate::types::{ConnectionId, UserId};

/// Everything a connection needs from the rest of the process
#[derive(Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub store: Arc<dyn MessageStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub mailbox_capacity: usize,
    pub send_timeout: Duration,
    pub allowed_origin: Option<String>,
}

impl ConnectionContext {
    pub fn new(
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            hub,
            store,
            identity,
            mailbox_capacity: config.mailbox_capacity,
            send_timeout: config.send_timeout,
            allowed_origin: config.allowed_origin.clone(),
        }
    }
}

/// Accept connections forever, one handler task each
pub async fn serve(listener: TcpListener, ctx: ConnectionContext) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New TCP connection from {}", addr);
                let ctx = ctx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        match e {
                            AppError::Rejected(reason) => {
                                info!("Rejected upgrade from {}: {}", addr, reason)
                            }
                            e => error!("Connection handler error: {}", e),
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Authenticates the upgrade request, performs the WebSocket handshake and
/// runs the connection until it ends.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (user_id, ws_stream) = upgrade(stream, &ctx).await?;
    info!("User {} connected from {}", user_id, peer_addr);

    let (sink, source) = transport::split(ws_stream);
    serve_connection(user_id.clone(), sink, source, &ctx).await?;

    info!("User {} disconnected from {}", user_id, peer_addr);
    Ok(())
}

/// WebSocket handshake, rejected with 401/403 unless the request authenticates
async fn upgrade<S>(
    stream: S,
    ctx: &ConnectionContext,
) -> Result<(UserId, tokio_tungstenite::WebSocketStream<S>), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut outcome: Option<Result<UserId, AuthError>> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let result = auth::authenticate(
            ctx.identity.as_ref(),
            ctx.allowed_origin.as_deref(),
            request,
        );
        let reply = match &result {
            Ok(_) => Ok(response),
            Err(e) => Err(rejection(e)),
        };
        outcome = Some(result);
        reply
    };

    let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;

    match (handshake, outcome) {
        (Ok(ws_stream), Some(Ok(user_id))) => Ok((user_id, ws_stream)),
        (_, Some(Err(reason))) => Err(AppError::Rejected(reason)),
        (Err(e), _) => Err(e.into()),
        (Ok(_), None) => Err(AppError::Rejected(AuthError::MissingToken)),
    }
}

fn rejection(err: &AuthError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = match err {
        AuthError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
        AuthError::MissingToken | AuthError::InvalidSession => StatusCode::UNAUTHORIZED,
    };
    response
}

/// Run one authenticated connection until either side ends
///
/// Registers with the hub, runs the inbound pump and the sender task
/// side by side, and when the first of them finishes cancels the other and
/// submits exactly one teardown to the hub.
pub async fn serve_connection<Tx, Rx>(
    user_id: UserId,
    sink: Tx,
    source: Rx,
    ctx: &ConnectionContext,
) -> Result<(), AppError>
where
    Tx: FrameSender + 'static,
    Rx: FrameReceiver + 'static,
{
    let connection_id = ConnectionId::new();
    let (mailbox, outbox) = Mailbox::channel(ctx.mailbox_capacity);

    // Register with the hub
    if let Err(e) = ctx.hub.connect(user_id.clone(), connection_id, mailbox).await {
        error!("Failed to register {} - hub closed", user_id);
        return Err(e);
    }

    // Mailbox -> socket
    let mut write_task = tokio::spawn(mailbox::run_sender(outbox, sink, ctx.send_timeout));

    // Socket -> store -> hub
    let pump = InboundPump::new(
        user_id.clone(),
        connection_id,
        ctx.store.clone(),
        ctx.hub.clone(),
    );
    let mut read_task = tokio::spawn(pump.run(source));

    // Wait for either task to complete
    let read_finished = tokio::select! {
        result = &mut read_task => {
            match result {
                Ok(Ok(())) => debug!("Read side of {} closed", connection_id),
                Ok(Err(e)) => debug!("Read side of {} failed: {}", connection_id, e),
                Err(e) => warn!("Read task of {} panicked or was cancelled: {}", connection_id, e),
            }
            true
        }
        result = &mut write_task => {
            read_task.abort();
            match result {
                Ok(Ok(())) => debug!("Mailbox of {} released", connection_id),
                Ok(Err(e)) => debug!("Write side of {} failed: {}", connection_id, e),
                Err(e) => warn!("Write task of {} panicked or was cancelled: {}", connection_id, e),
            }
            false
        }
    };

    let _ = ctx.hub.disconnect(user_id, connection_id).await;

    // Teardown releases the mailbox, so the sender flushes what is queued
    // and closes the socket
    if read_finished && timeout(ctx.send_timeout, &mut write_task).await.is_err() {
        debug!("Sender of {} did not close in time, aborting", connection_id);
        write_task.abort();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::auth::SessionTable;
    use crate::hub::Hub;
    use crate::message::{ChatMessage, PresenceEntry, ServerMessage};
    use crate::store::MemoryStore;
    use crate::transport::{self, mock};

    fn context() -> ConnectionContext {
        let (hub, actor) = Hub::channel(64);
        tokio::spawn(actor.run());
        ConnectionContext::new(
            hub,
            Arc::new(MemoryStore::new()),
            Arc::new(SessionTable::new()),
            &ServerConfig::default(),
        )
    }

    struct FakePeer {
        to_hub: Option<mpsc::UnboundedSender<String>>,
        from_hub: mpsc::UnboundedReceiver<String>,
        task: tokio::task::JoinHandle<Result<(), AppError>>,
    }

    fn open(ctx: &ConnectionContext, name: &str) -> FakePeer {
        let (to_hub, source) = mock::receiver();
        let (sink, from_hub) = mock::sender();
        let ctx = ctx.clone();
        let user_id = UserId::from(name);
        let task = tokio::spawn(async move { serve_connection(user_id, sink, source, &ctx).await });
        FakePeer {
            to_hub: Some(to_hub),
            from_hub,
            task,
        }
    }

    impl FakePeer {
        fn say(&self, text: &str) {
            if let Some(tx) = &self.to_hub {
                tx.send(text.to_string()).unwrap();
            }
        }

        async fn next(&mut self) -> ServerMessage {
            let text = timeout(Duration::from_secs(1), self.from_hub.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed");
            serde_json::from_str(&text).unwrap()
        }

        async fn next_user_list(&mut self) -> Vec<PresenceEntry> {
            loop {
                if let ServerMessage::UserList { users } = self.next().await {
                    return users;
                }
            }
        }

        async fn hang_up(mut self) {
            self.to_hub.take();
            timeout(Duration::from_secs(1), self.task)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    fn online(users: &[PresenceEntry], name: &str) -> bool {
        users
            .iter()
            .any(|e| e.user_id.as_str() == name && e.online)
    }

    #[tokio::test]
    async fn test_chat_between_two_connections() {
        let ctx = context();
        let mut alice = open(&ctx, "alice");
        assert!(online(&alice.next_user_list().await, "alice"));
        let mut bob = open(&ctx, "bob");
        assert!(online(&bob.next_user_list().await, "bob"));

        alice.say(r#"{"type":"message","to":"bob","content":"hi"}"#);

        let ServerMessage::Message(got) = bob.next().await else {
            panic!("expected chat frame");
        };
        assert_eq!(got.from.as_str(), "alice");
        assert_eq!(got.content, "hi");

        loop {
            if let ServerMessage::Message(echo) = alice.next().await {
                assert_eq!(echo, got);
                break;
            }
        }

        let users = bob.next_user_list().await;
        assert!(online(&users, "alice") && online(&users, "bob"));
    }

    #[tokio::test]
    async fn test_hang_up_marks_user_offline() {
        let ctx = context();
        let mut alice = open(&ctx, "alice");
        alice.next_user_list().await;
        let bob = open(&ctx, "bob");
        let users = alice.next_user_list().await;
        assert!(online(&users, "bob"));

        bob.hang_up().await;

        let users = alice.next_user_list().await;
        assert!(!online(&users, "bob"));
        assert!(users.iter().any(|e| e.user_id.as_str() == "bob"));
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_only_that_connection() {
        let ctx = context();
        let mut alice = open(&ctx, "alice");
        alice.next_user_list().await;
        let mallory = open(&ctx, "mallory");
        alice.next_user_list().await;

        mallory.say("this is not json");
        timeout(Duration::from_secs(1), mallory.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let users = alice.next_user_list().await;
        assert!(!online(&users, "mallory"));

        // Hub still serves everyone else
        let snapshot = ctx.hub.snapshot().await.unwrap();
        assert!(online(&snapshot, "alice"));
    }

    #[tokio::test]
    async fn test_failed_send_tears_down() {
        let ctx = context();
        let mut alice = open(&ctx, "alice");
        alice.next_user_list().await;

        let bob = open(&ctx, "bob");
        alice.next_user_list().await;

        // Bob's socket is gone; the next frame queued for him fails to send
        let FakePeer { from_hub, task, to_hub } = bob;
        drop(from_hub);
        alice.say(r#"{"type":"message","to":"bob","content":"anyone?"}"#);

        timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        drop(to_hub);

        let users = ctx.hub.snapshot().await.unwrap();
        assert!(!online(&users, "bob"));
    }

    /// Forwards to a channel sink and reports when it is closed
    struct ClosingSink {
        inner: mock::ChannelSender,
        closed: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl FrameSender for ClosingSink {
        async fn send(&mut self, frame: String) -> Result<(), AppError> {
            self.inner.send(frame).await
        }

        async fn close(&mut self) {
            self.inner.close().await;
            if let Some(tx) = self.closed.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn test_peer_close_closes_sink() {
        let ctx = context();
        let (to_hub, source) = mock::receiver();
        let (inner, mut from_hub) = mock::sender();
        let (closed_tx, closed_rx) = oneshot::channel();
        let sink = ClosingSink {
            inner,
            closed: Some(closed_tx),
        };

        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            serve_connection("bob".into(), sink, source, &task_ctx).await
        });
        timeout(Duration::from_secs(1), from_hub.recv())
            .await
            .unwrap()
            .unwrap();

        drop(to_hub);
        timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Aborting the sender would drop the oneshot without sending
        assert!(closed_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_peer_that_stops_reading_is_torn_down() {
        use tokio_tungstenite::tungstenite::protocol::Role;
        use tokio_tungstenite::WebSocketStream;

        let mut ctx = context();
        ctx.send_timeout = Duration::from_millis(100);

        // The client end is kept open but never read, so writes back up
        let (server_io, client_io) = tokio::io::duplex(64);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let _client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let (sink, source) = transport::split(server);

        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            serve_connection("bob".into(), sink, source, &task_ctx).await
        });

        for n in 0..20 {
            let content = format!("{}{}", n, "x".repeat(1024));
            ctx.hub
                .route(ChatMessage::stamp("alice".into(), "bob".into(), content))
                .await
                .unwrap();
        }

        timeout(Duration::from_secs(3), task)
            .await
            .expect("connection was not torn down after send timeout")
            .unwrap()
            .unwrap();

        let users = ctx.hub.snapshot().await.unwrap();
        assert!(!online(&users, "bob"));
    }
}
