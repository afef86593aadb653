//! PostgreSQL LISTEN/NOTIFY source
//!
//! Every connect opens a fresh `PgListener` with its own dedicated
//! connection (never one borrowed from the request pool), so the
//! subscription is owned by the listener loop alone.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;

use super::{ChangeSource, ListenerError, Notification, SourceConnection};

/// Connects to PostgreSQL from a connection string.
#[derive(Clone)]
pub struct PgChangeSource {
    database_url: String,
}

impl PgChangeSource {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

pub struct PgSourceConnection {
    listener: PgListener,
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    type Connection = PgSourceConnection;

    async fn connect(&self, channel: &str) -> Result<Self::Connection, ListenerError> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(ListenerError::Connect)?;

        listener
            .listen(channel)
            .await
            .map_err(|source| ListenerError::Listen {
                channel: channel.to_string(),
                source,
            })?;

        Ok(PgSourceConnection { listener })
    }
}

#[async_trait]
impl SourceConnection for PgSourceConnection {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Notification>, ListenerError> {
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(Some(notification))) => Ok(Some(Notification {
                channel: notification.channel().to_string(),
                payload: notification.payload().to_string(),
            })),
            // try_recv reports a dropped connection as Ok(None)
            Ok(Ok(None)) => Err(ListenerError::ConnectionLost),
            Ok(Err(e)) => Err(ListenerError::Receive(e)),
        }
    }

    async fn close(self) {
        // Dropping the listener drops its private pool, closing the
        // connection. UNLISTEN would reconnect a broken one first.
        drop(self.listener);
        tracing::debug!("listener connection closed");
    }
}
