//! dbrelay-server: PostgreSQL change relay
//!
//! Listens for row-change notifications on one PostgreSQL channel and
//! fans them out to every WebSocket subscriber in a broadcast group.
//! Also serves the health check and the admin API over the same pool.
//!
//! ```text
//! PostgreSQL NOTIFY ──► listener thread ──► BroadcastRegistry ──► Session ──► WebSocket
//! ```

pub mod coordinator;
pub mod db;
pub mod error;
pub mod http;
pub mod listener;
pub mod registry;
pub mod session;

use std::future::Future;
use std::sync::Arc;

use dbrelay_core::{ProcessRole, RelayConfig};

pub use coordinator::{RelayCoordinator, RelayHandle};
pub use error::{Result, ServerError};
pub use listener::ListenerError;
pub use registry::{BroadcastRegistry, SessionId};
pub use session::{ChangeRegistry, Session};

use crate::http::{AppState, ServerConfig};
use crate::listener::PgChangeSource;

/// Run the relay and HTTP server until Ctrl+C or SIGTERM.
///
/// Only a [`ProcessRole::Primary`] process starts the change listener;
/// an auxiliary process serves HTTP without relaying events.
pub async fn serve(config: RelayConfig, role: ProcessRole) -> Result<()> {
    let server = ServerConfig::from(&config);
    let (state, relay) = bootstrap(&config, role).await?;
    let served = http::run_server(state, server).await;
    shutdown_relay(relay).await;
    served
}

/// As [`serve`], stopping when `shutdown` resolves.
pub async fn serve_until<F>(config: RelayConfig, role: ProcessRole, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = ServerConfig::from(&config);
    let (state, relay) = bootstrap(&config, role).await?;
    let served = http::run_server_until(state, server, shutdown).await;
    shutdown_relay(relay).await;
    served
}

async fn bootstrap(
    config: &RelayConfig,
    role: ProcessRole,
) -> Result<(Arc<AppState>, Option<RelayHandle>)> {
    config.validate()?;
    let database_url = config.database_url()?;

    let pool = db::create_pool_with_options(database_url, config.max_connections).await?;
    tracing::info!(max_connections = config.max_connections, "database pool ready");

    let registry = Arc::new(ChangeRegistry::new());
    let coordinator = RelayCoordinator::new(role, registry.clone(), config.relay.clone());
    let relay = coordinator.start(PgChangeSource::new(database_url))?;

    let state = Arc::new(AppState::new(pool, registry, config.relay.clone()));
    Ok((state, relay))
}

async fn shutdown_relay(relay: Option<RelayHandle>) {
    if let Some(relay) = relay {
        relay.shutdown().await;
    }
}
