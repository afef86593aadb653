//! Relay coordinator: process-wide owner of the change listener
//!
//! The coordinator is built explicitly with the process role rather than
//! consulting global state. Only a [`ProcessRole::Primary`] process
//! starts the listener, and only once per coordinator.
//!
//! The listener runs on its own OS thread with a single-threaded tokio
//! runtime, so a stall in the upstream connection can never starve the
//! request-serving runtime. Panics are caught at the thread boundary and
//! logged; open sessions keep working without new events.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::extract::ws::Utf8Bytes;
use dbrelay_core::{ChangeEvent, ProcessRole, RelaySettings, ServerFrame};
use futures::FutureExt;

use crate::listener::{ChangeListener, ChangeSource, EventSink, ListenerHandle, ListenerSettings};
use crate::session::ChangeRegistry;

const LISTENER_THREAD: &str = "dbrelay-listener";

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("change relay already started")]
    AlreadyStarted,

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Forwards parsed events to every subscriber of one group.
pub struct RelaySink {
    registry: Arc<ChangeRegistry>,
    group: String,
}

impl RelaySink {
    pub fn new(registry: Arc<ChangeRegistry>, group: impl Into<String>) -> Self {
        Self {
            registry,
            group: group.into(),
        }
    }
}

impl EventSink for RelaySink {
    fn publish(&self, event: ChangeEvent) {
        let text = match ServerFrame::from(&event).to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(table = event.table(), error = %e, "failed to encode change event");
                return;
            }
        };

        let report = self.registry.broadcast(&self.group, &Utf8Bytes::from(text));
        tracing::debug!(
            group = %self.group,
            table = event.table(),
            operation = %event.operation(),
            delivered = report.delivered,
            dropped = report.dropped,
            "change event relayed"
        );
    }
}

pub struct RelayCoordinator {
    role: ProcessRole,
    registry: Arc<ChangeRegistry>,
    settings: RelaySettings,
    started: AtomicBool,
}

impl RelayCoordinator {
    pub fn new(role: ProcessRole, registry: Arc<ChangeRegistry>, settings: RelaySettings) -> Self {
        Self {
            role,
            registry,
            settings,
            started: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Start the listener on a dedicated thread.
    ///
    /// Returns `Ok(None)` in auxiliary processes, where nothing is started.
    pub fn start<S>(&self, source: S) -> Result<Option<RelayHandle>, CoordinatorError>
    where
        S: ChangeSource + 'static,
    {
        if !self.role.is_primary() {
            tracing::info!("auxiliary process, change relay not started");
            return Ok(None);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let (listener, handle) = ChangeListener::new(source, ListenerSettings::from(&self.settings));
        let sink = RelaySink::new(self.registry.clone(), self.settings.group.clone());

        let thread = std::thread::Builder::new()
            .name(LISTENER_THREAD.to_string())
            .spawn(move || run_isolated(listener, sink))
            .inspect_err(|_| self.started.store(false, Ordering::SeqCst))?;

        tracing::info!(
            channel = %self.settings.channel,
            group = %self.settings.group,
            "change relay started"
        );
        Ok(Some(RelayHandle {
            listener: handle,
            thread: Some(thread),
        }))
    }
}

fn run_isolated<S: ChangeSource>(listener: ChangeListener<S>, sink: RelaySink) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to build listener runtime");
            return;
        }
    };

    match runtime.block_on(AssertUnwindSafe(listener.run(&sink)).catch_unwind()) {
        Ok(stats) => tracing::debug!(?stats, "listener thread exiting"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "change listener crashed; no further events will be relayed");
        }
    }
}

/// Owns the running listener thread. Dropping it stops the listener.
pub struct RelayHandle {
    listener: ListenerHandle,
    thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn stop(&self) {
        self.listener.stop();
    }

    /// True once the listener thread has exited (stopped or crashed).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the listener and wait for its thread without blocking the
    /// async runtime.
    pub async fn shutdown(mut self) {
        self.stop();
        let Some(thread) = self.thread.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::info!("change relay shut down"),
            Ok(Err(_)) => tracing::error!("listener thread panicked during shutdown"),
            Err(e) => tracing::error!(error = %e, "failed to join listener thread"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::listener::{ListenerError, Notification, SourceConnection};
    use crate::registry::SessionId;

    struct FixedSource {
        payloads: Arc<Mutex<VecDeque<&'static str>>>,
    }

    struct FixedConnection {
        payloads: Arc<Mutex<VecDeque<&'static str>>>,
    }

    #[async_trait]
    impl ChangeSource for FixedSource {
        type Connection = FixedConnection;

        async fn connect(&self, _channel: &str) -> Result<Self::Connection, ListenerError> {
            Ok(FixedConnection {
                payloads: self.payloads.clone(),
            })
        }
    }

    #[async_trait]
    impl SourceConnection for FixedConnection {
        async fn poll(&mut self, timeout: Duration) -> Result<Option<Notification>, ListenerError> {
            let next = self.payloads.lock().pop_front();
            match next {
                Some(payload) => Ok(Some(Notification {
                    channel: "db_changes".into(),
                    payload: payload.into(),
                })),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        async fn close(self) {}
    }

    struct PanickingSource;

    #[async_trait]
    impl ChangeSource for PanickingSource {
        type Connection = FixedConnection;

        async fn connect(&self, _channel: &str) -> Result<Self::Connection, ListenerError> {
            panic!("upstream driver bug");
        }
    }

    fn fast_settings() -> RelaySettings {
        RelaySettings {
            startup_grace_ms: 0,
            poll_timeout_ms: 10,
            reconnect_backoff_ms: 10,
            ..RelaySettings::default()
        }
    }

    fn source(payloads: &[&'static str]) -> FixedSource {
        FixedSource {
            payloads: Arc::new(Mutex::new(payloads.iter().copied().collect())),
        }
    }

    #[test]
    fn auxiliary_process_never_starts_listener() {
        let coordinator =
            RelayCoordinator::new(ProcessRole::Auxiliary, Arc::new(ChangeRegistry::new()), fast_settings());
        assert!(coordinator.start(source(&[])).unwrap().is_none());
        // still allowed to report None again; nothing was started
        assert!(coordinator.start(source(&[])).unwrap().is_none());
    }

    #[tokio::test]
    async fn primary_process_starts_exactly_once() {
        let coordinator =
            RelayCoordinator::new(ProcessRole::Primary, Arc::new(ChangeRegistry::new()), fast_settings());

        let handle = coordinator.start(source(&[])).unwrap().expect("primary should start");
        assert!(matches!(
            coordinator.start(source(&[])),
            Err(CoordinatorError::AlreadyStarted)
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn events_reach_registry_members() {
        let registry = Arc::new(ChangeRegistry::new());
        let (tx, mut rx) = mpsc::channel(16);
        registry.join("db_changes", SessionId::new(), tx);

        let coordinator = RelayCoordinator::new(ProcessRole::Primary, registry, fast_settings());
        let handle = coordinator
            .start(source(&[
                r#"{"table":"profiles","operation":"insert","data":{"id":1}}"#,
                r#"{"table":"profiles"}"#,
                r#"{"table":"profiles","operation":"delete","data":{"id":1}}"#,
            ]))
            .unwrap()
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        handle.shutdown().await;

        let first: ServerFrame = serde_json::from_str(first.as_str()).unwrap();
        let second: ServerFrame = serde_json::from_str(second.as_str()).unwrap();
        assert!(matches!(first, ServerFrame::DbChange { operation: dbrelay_core::Operation::Insert, .. }));
        assert!(matches!(second, ServerFrame::DbChange { operation: dbrelay_core::Operation::Delete, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listener_panic_is_contained() {
        let coordinator =
            RelayCoordinator::new(ProcessRole::Primary, Arc::new(ChangeRegistry::new()), fast_settings());
        let handle = coordinator.start(PanickingSource).unwrap().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(handle.is_finished());
        handle.shutdown().await;
    }
}
