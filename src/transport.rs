//! Connection adapter
//!
//! Wraps the two halves of one duplex connection behind frame-level
//! receive/send operations, so the pump and the sender task never touch
//! the WebSocket types directly.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::AppError;

/// Receive side of a connection
#[async_trait]
pub trait FrameReceiver: Send {
    /// Wait for the next text frame
    ///
    /// Returns `Ok(None)` exactly once when the peer goes away; every call
    /// after that fails with [`AppError::Closed`].
    async fn receive(&mut self) -> Result<Option<String>, AppError>;
}

/// Send side of a connection
#[async_trait]
pub trait FrameSender: Send {
    /// Write one text frame. Fails once the peer has closed.
    async fn send(&mut self, frame: String) -> Result<(), AppError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Split an upgraded WebSocket into adapter halves
pub fn split<S>(ws_stream: WebSocketStream<S>) -> (WsSender<S>, WsReceiver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = ws_stream.split();
    (
        WsSender {
            inner: sink,
            closed: false,
        },
        WsReceiver {
            inner: stream,
            closed: false,
        },
    )
}

pub struct WsReceiver<S> {
    inner: SplitStream<WebSocketStream<S>>,
    closed: bool,
}

#[async_trait]
impl<S> FrameReceiver for WsReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, AppError> {
        if self.closed {
            return Err(AppError::Closed);
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(_))) => {
                    return Err(AppError::Protocol("binary frames are not accepted".to_string()));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pong is handled automatically by tungstenite
                    continue;
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Peer closed the connection");
                    self.closed = true;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    self.closed = true;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(e.into());
                }
            }
        }
    }
}

pub struct WsSender<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

#[async_trait]
impl<S> FrameSender for WsSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: String) -> Result<(), AppError> {
        if self.closed {
            return Err(AppError::Closed);
        }
        if let Err(e) = self.inner.send(Message::Text(frame.into())).await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.inner.close().await;
        }
    }
}
