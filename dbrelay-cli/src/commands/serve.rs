//! Run the relay and its HTTP API

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use dbrelay_core::{ProcessRole, RelayConfig};

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to (default: 127.0.0.1:8000)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long)]
    pub cors_permissive: bool,

    /// Database URL (overrides config/environment)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Whether this process owns the change listener; without it no changes
    /// are relayed (default: derived from DBRELAY_RUN_MAIN / DBRELAY_SERVER_RUNNING)
    #[arg(long, value_name = "BOOL")]
    pub primary: Option<bool>,
}

impl ServeArgs {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if self.cors_permissive {
            config.cors_permissive = true;
        }
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
    }

    fn role(&self) -> ProcessRole {
        match self.primary {
            Some(true) => ProcessRole::Primary,
            Some(false) => ProcessRole::Auxiliary,
            None => ProcessRole::from_env(),
        }
    }
}

/// Warning for a role that serves HTTP but relays nothing.
fn auxiliary_warning(role: ProcessRole) -> Option<&'static str> {
    (!role.is_primary()).then_some(
        "auxiliary role: change relay disabled, WebSocket subscribers will receive no events; \
         pass --primary true or set DBRELAY_RUN_MAIN=true",
    )
}

/// Run the HTTP server (blocks until shutdown)
pub async fn run_serve(args: ServeArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = RelayConfig::load(config_path).context("failed to load configuration")?;
    args.apply(&mut config);
    config
        .database_url()
        .context("DATABASE_URL not set. Set via --database-url, DATABASE_URL, PSQL_DB_* or the config file")?;

    let role = args.role();
    tracing::info!(
        bind = %config.bind_addr,
        ?role,
        channel = %config.relay.channel,
        "starting dbrelay server"
    );
    if let Some(warning) = auxiliary_warning(role) {
        tracing::warn!("{warning}");
    }

    dbrelay_server::serve(config, role)
        .await
        .context("server error")?;
    Ok(())
}
