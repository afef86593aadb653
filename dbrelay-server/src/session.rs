//! Subscriber sessions: one per WebSocket connection
//!
//! Lifecycle: `Connecting → Open → Closing → Closed`, never reopened.
//!
//! - On open the welcome frame is queued, then the session joins its
//!   broadcast group, so the welcome is always the first frame out.
//! - While open, broadcast frames arrive through the session's bounded
//!   outbox and are written in order; inbound pings are answered.
//! - On any transport close or error the session leaves the group.
//!   `Drop` does the same if the task is torn down early.

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use dbrelay_core::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

use crate::registry::{BroadcastRegistry, SessionId};

/// Registry of serialized frames, shared by all sessions.
pub type ChangeRegistry = BroadcastRegistry<Utf8Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session cannot open from state {0:?}")]
    InvalidState(SessionState),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("outbox rejected the welcome frame")]
    Outbox,
}

pub struct Session {
    id: SessionId,
    group: String,
    registry: Arc<ChangeRegistry>,
    state: SessionState,
    outbox_tx: Option<mpsc::Sender<Utf8Bytes>>,
    outbox_rx: mpsc::Receiver<Utf8Bytes>,
}

impl Session {
    pub fn new(registry: Arc<ChangeRegistry>, group: impl Into<String>, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            id: SessionId::new(),
            group: group.into(),
            registry,
            state: SessionState::Connecting,
            outbox_tx: Some(tx),
            outbox_rx: rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `Connecting → Open`: queue the welcome frame and join the group.
    ///
    /// On failure the session is left `Closed` and never joined.
    pub fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState(self.state));
        }

        let result = self.try_open();
        if result.is_err() {
            self.state = SessionState::Closed;
        }
        result
    }

    fn try_open(&mut self) -> Result<(), SessionError> {
        let tx = self.outbox_tx.take().ok_or(SessionError::Outbox)?;
        let welcome = ServerFrame::welcome().to_text()?;
        tx.try_send(Utf8Bytes::from(welcome))
            .map_err(|_| SessionError::Outbox)?;

        // Only the registry holds the sender from here on.
        self.registry.join(&self.group, self.id, tx);
        self.state = SessionState::Open;
        tracing::info!(session_id = %self.id, group = %self.group, "subscriber connected");
        Ok(())
    }

    /// Reply to send for an inbound text frame, if any.
    pub fn handle_text(&self, text: &str) -> Option<ServerFrame> {
        match ClientFrame::parse(text) {
            Ok(ClientFrame::Ping) => Some(ServerFrame::Pong),
            Ok(ClientFrame::Unknown) => {
                tracing::debug!(session_id = %self.id, "ignoring client frame");
                None
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "malformed client frame");
                None
            }
        }
    }

    /// `Open → Closing → Closed`. Safe to call more than once.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Connecting => {
                self.state = SessionState::Closed;
                return;
            }
            SessionState::Open | SessionState::Closing => {}
        }

        self.state = SessionState::Closing;
        self.registry.leave(&self.group, self.id);
        self.outbox_rx.close();
        self.state = SessionState::Closed;
        tracing::info!(session_id = %self.id, group = %self.group, "subscriber disconnected");
    }

    async fn next_outbound(&mut self) -> Option<Utf8Bytes> {
        self.outbox_rx.recv().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive one accepted WebSocket until either side goes away.
pub async fn serve_socket(mut socket: WebSocket, mut session: Session) {
    if let Err(e) = session.open() {
        tracing::warn!(session_id = %session.id(), error = %e, "failed to open subscriber session");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = session.next_outbound() => {
                let Some(text) = outbound else { break };
                if let Err(e) = socket.send(Message::Text(text)).await {
                    tracing::debug!(session_id = %session.id(), error = %e, "send failed");
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = session.handle_text(text.as_str()) else { continue };
                        let sent = match reply.to_text() {
                            Ok(body) => socket.send(Message::Text(body.into())).await,
                            Err(e) => {
                                tracing::warn!(session_id = %session.id(), error = %e, "failed to encode reply");
                                continue;
                            }
                        };
                        if let Err(e) = sent {
                            tracing::debug!(session_id = %session.id(), error = %e, "reply failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(
                            session_id = %session.id(),
                            code = frame.as_ref().map(|f| f.code),
                            "client closed connection"
                        );
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(session_id = %session.id(), "ignoring binary frame");
                    }
                    // Ping/Pong control frames are answered by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.id(), error = %e, "receive failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    session.close();
}
