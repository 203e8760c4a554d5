//! One accepted WebSocket connection.
//!
//! # Data Flow
//! ```text
//! socket frames ──▶ frame::classify ──▶ registry.deliver / report / close
//! registry.send ──▶ Command queue ──▶ frame encode ──▶ socket
//! socket gone   ──▶ registry.detach (once)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::SessionError;
use crate::http::context::RequestContext;
use crate::websocket::frame::{classify, FrameEvent, Payload, PayloadKind};
use crate::websocket::registry::ConnectionRegistry;

/// Instruction for the socket task.
#[derive(Debug)]
pub enum Command {
    Send(Message),
    Close,
}

struct SessionInner {
    id: String,
    kind: PayloadKind,
    max_size: usize,
    closed: AtomicBool,
    detached: AtomicBool,
    tx: mpsc::UnboundedSender<Command>,
    ctx: Option<Arc<RequestContext>>,
}

/// Cheap, cloneable handle to a live session.
#[derive(Clone)]
pub struct SessionHandle(Arc<SessionInner>);

impl SessionHandle {
    /// Create a handle and the command queue its socket task drains.
    pub fn new(
        id: String,
        kind: PayloadKind,
        max_size: usize,
        ctx: Arc<RequestContext>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        Self::build(id, kind, max_size, Some(ctx))
    }

    /// A handle with no request context, for driving a registry without a socket.
    pub fn detached(
        id: &str,
        kind: PayloadKind,
        max_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        Self::build(id.to_string(), kind, max_size, None)
    }

    fn build(
        id: String,
        kind: PayloadKind,
        max_size: usize,
        ctx: Option<Arc<RequestContext>>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            id,
            kind,
            max_size,
            closed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            tx,
            ctx,
        };
        (Self(Arc::new(inner)), rx)
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn kind(&self) -> PayloadKind {
        self.0.kind
    }

    pub fn max_size(&self) -> usize {
        self.0.max_size
    }

    /// Request that opened this connection.
    pub fn context(&self) -> Option<&Arc<RequestContext>> {
        self.0.ctx.as_ref()
    }

    /// Client IP, when the session came from a real request.
    pub fn ip(&self) -> Option<String> {
        self.context().map(|ctx| ctx.ip())
    }

    /// Authorized user attached during the handshake.
    pub fn user<T: 'static>(&self) -> Option<&T> {
        self.context().and_then(|ctx| ctx.user::<T>())
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Queue a message; false once the session is closed.
    pub fn send(&self, message: impl Into<Payload>) -> bool {
        if self.is_closed() {
            return false;
        }
        let message = message.into().into_message(self.0.kind);
        self.0.tx.send(Command::Send(message)).is_ok()
    }

    /// Ask the socket task to close. Idempotent.
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.0.tx.send(Command::Close);
    }

    /// First caller gets true; used to run detach effects once.
    pub(crate) fn mark_detached(&self) -> bool {
        !self.0.detached.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drive one connection until either side closes.
///
/// The session must already be attached to `registry`; it is detached when
/// this returns.
pub async fn run<S>(
    stream: WebSocketStream<S>,
    session: SessionHandle,
    mut commands: mpsc::UnboundedReceiver<Command>,
    registry: Arc<ConnectionRegistry>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut incoming) = stream.split();

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(message)) => match classify(message, session.kind(), session.max_size()) {
                    FrameEvent::Message(payload) => registry.deliver(&session, payload),
                    FrameEvent::Error(error) => registry.report(&error, Some(&session)),
                    FrameEvent::Ignore => {}
                    FrameEvent::Close => {
                        session.close();
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                Some(Err(error)) => {
                    registry.report(&SessionError::Transport(error), Some(&session));
                    break;
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(error) = sink.send(message).await {
                        registry.report(&SessionError::Transport(error), Some(&session));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    session.close();
    let _ = sink.close().await;
    registry.detach(&session);

    tracing::debug!(
        connection_id = %session.id(),
        key = %registry.key(),
        "WebSocket session ended"
    );
}
