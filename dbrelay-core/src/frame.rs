//! JSON frames exchanged with WebSocket subscribers.
//!
//! Every frame is an object tagged by `type`:
//! - server → client: `connection_established`, `pong`, `db_change`
//! - client → server: `ping` (anything else is ignored)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{ChangeEvent, Operation};

/// Confirmation text sent right after the handshake.
pub const WELCOME_MESSAGE: &str = "Connected to real-time updates";

/// Frames pushed from the server to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished {
        message: String,
    },
    Pong,
    DbChange {
        table: String,
        operation: Operation,
        data: Value,
    },
}

impl ServerFrame {
    pub fn welcome() -> Self {
        ServerFrame::ConnectionEstablished {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    /// Serialize to the text payload of a WebSocket frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&ChangeEvent> for ServerFrame {
    fn from(event: &ChangeEvent) -> Self {
        ServerFrame::DbChange {
            table: event.table().to_string(),
            operation: event.operation(),
            data: event.data().clone(),
        }
    }
}

/// Control frames a subscriber may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    /// Any other `type`; accepted and ignored.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Fails only when the text is not a JSON object with a string `type`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
