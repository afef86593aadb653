//! Change source adapter: upstream subscription and reconnect loop
//!
//! [`ChangeListener::run`] owns the upstream connection for its whole
//! lifetime:
//!
//! 1. wait the startup grace period
//! 2. connect and LISTEN on the configured channel
//! 3. poll with a bounded timeout, parsing each payload in arrival order
//! 4. on a connection error: close, sleep a fixed backoff, go to 2
//!
//! Malformed payloads are logged and dropped. Nothing escapes `run`; it
//! returns only after [`ListenerHandle::stop`] (or dropping the handle).
//!
//! The upstream is abstracted behind [`ChangeSource`] so the loop can be
//! driven by scripted sources in tests. [`PgChangeSource`] is the
//! PostgreSQL implementation.

mod postgres;

pub use postgres::{PgChangeSource, PgSourceConnection};

use std::time::Duration;

use async_trait::async_trait;
use dbrelay_core::{ChangeEvent, RelaySettings};
use tokio::sync::watch;

/// Upstream connection failures. All of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to connect: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to LISTEN on channel '{channel}': {source}")]
    Listen {
        channel: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to receive notification: {0}")]
    Receive(#[source] sqlx::Error),

    #[error("connection to the database was lost")]
    ConnectionLost,
}

/// A raw notification, before payload parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Opens subscriptions to an upstream notification channel.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    type Connection: SourceConnection;

    /// Open a dedicated connection and subscribe it to `channel`.
    async fn connect(&self, channel: &str) -> Result<Self::Connection, ListenerError>;
}

/// One live upstream subscription.
#[async_trait]
pub trait SourceConnection: Send {
    /// Wait at most `timeout` for the next notification.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to report.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Notification>, ListenerError>;

    /// Release the connection. Best-effort; never fails.
    async fn close(self);
}

/// Receives parsed events, in upstream order.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

impl<F> EventSink for F
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    fn publish(&self, event: ChangeEvent) {
        self(event)
    }
}

/// Timing and channel settings for the listener loop.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub channel: String,
    pub startup_grace: Duration,
    pub poll_timeout: Duration,
    pub reconnect_backoff: Duration,
}

impl From<&RelaySettings> for ListenerSettings {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            channel: settings.channel.clone(),
            startup_grace: settings.startup_grace(),
            poll_timeout: settings.poll_timeout(),
            reconnect_backoff: settings.reconnect_backoff(),
        }
    }
}

/// Counters reported when the listener exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStats {
    /// Successful connect + LISTEN sequences
    pub connects: u64,
    /// Failed connects and lost connections
    pub failures: u64,
    /// Events handed to the sink
    pub events: u64,
    /// Payloads dropped because they did not parse
    pub malformed: u64,
}

/// Stops a running [`ChangeListener`].
#[derive(Debug)]
pub struct ListenerHandle {
    running: watch::Sender<bool>,
}

impl ListenerHandle {
    /// Ask the listener to exit. It notices within one poll timeout, or
    /// immediately while sleeping.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }
}

pub struct ChangeListener<S> {
    source: S,
    settings: ListenerSettings,
    running: watch::Receiver<bool>,
}

impl<S: ChangeSource> ChangeListener<S> {
    pub fn new(source: S, settings: ListenerSettings) -> (Self, ListenerHandle) {
        let (tx, rx) = watch::channel(true);
        let listener = Self {
            source,
            settings,
            running: rx,
        };
        (listener, ListenerHandle { running: tx })
    }

    fn is_running(&self) -> bool {
        *self.running.borrow() && self.running.has_changed().is_ok()
    }

    /// Run until stopped, publishing every well-formed event to `sink`.
    pub async fn run<K: EventSink + ?Sized>(self, sink: &K) -> ListenerStats {
        let mut stats = ListenerStats::default();
        let channel = self.settings.channel.clone();

        if !self.sleep_unless_stopped(self.settings.startup_grace).await {
            return stats;
        }
        tracing::info!(%channel, "change listener starting");

        while self.is_running() {
            match self.source.connect(&channel).await {
                Ok(mut conn) => {
                    stats.connects += 1;
                    tracing::info!(%channel, "listening for notifications");

                    let outcome = self.pump(&mut conn, sink, &mut stats).await;
                    conn.close().await;

                    match outcome {
                        Ok(()) => break,
                        Err(e) => {
                            stats.failures += 1;
                            tracing::warn!(%channel, error = %e, "listener connection failed");
                        }
                    }
                }
                Err(e) => {
                    stats.failures += 1;
                    tracing::warn!(%channel, error = %e, "listener connect failed");
                }
            }

            let backoff = self.settings.reconnect_backoff;
            tracing::debug!(%channel, backoff_ms = backoff.as_millis() as u64, "reconnecting after backoff");
            if !self.sleep_unless_stopped(backoff).await {
                break;
            }
        }

        tracing::info!(
            %channel,
            connects = stats.connects,
            events = stats.events,
            malformed = stats.malformed,
            "change listener stopped"
        );
        stats
    }

    /// Poll one connection until stopped (`Ok`) or broken (`Err`).
    async fn pump<K: EventSink + ?Sized>(
        &self,
        conn: &mut S::Connection,
        sink: &K,
        stats: &mut ListenerStats,
    ) -> Result<(), ListenerError> {
        while self.is_running() {
            if let Some(notification) = conn.poll(self.settings.poll_timeout).await? {
                dispatch(&notification, sink, stats);
            }
        }
        Ok(())
    }

    /// Sleep for `duration`; returns `false` if stopped in the meantime.
    async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        let mut running = self.running.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = running.wait_for(|running| !running) => false,
        }
    }
}

fn dispatch<K: EventSink + ?Sized>(notification: &Notification, sink: &K, stats: &mut ListenerStats) {
    match ChangeEvent::from_payload(&notification.payload) {
        Ok(event) => {
            tracing::debug!(
                table = event.table(),
                operation = %event.operation(),
                "notification received"
            );
            stats.events += 1;
            sink.publish(event);
        }
        Err(e) => {
            stats.malformed += 1;
            tracing::warn!(
                channel = %notification.channel,
                error = %e,
                payload = %preview(&notification.payload),
                "dropping malformed notification"
            );
        }
    }
}

fn preview(payload: &str) -> String {
    const LIMIT: usize = 100;
    let mut out: String = payload.chars().take(LIMIT).collect();
    if payload.chars().nth(LIMIT).is_some() {
        out.push_str("...");
    }
    out
}
