//! Create tables and install the change-notification triggers

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use dbrelay_core::RelayConfig;
use dbrelay_server::db::{create_pool, migrations};

#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// Database URL (overrides config/environment)
    #[arg(long)]
    pub database_url: Option<String>,
}

/// Runs as an auxiliary process: the change relay is never started here.
pub async fn run_migrate(args: MigrateArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = RelayConfig::load(config_path).context("failed to load configuration")?;
    if let Some(url) = args.database_url {
        config.database_url = Some(url);
    }
    let database_url = config
        .database_url()
        .context("DATABASE_URL not set. Set via --database-url, DATABASE_URL, PSQL_DB_* or the config file")?;

    let pool = create_pool(database_url)
        .await
        .context("failed to connect to database")?;
    migrations::run(&pool, &config.relay.channel)
        .await
        .context("migration failed")?;

    println!(
        "migrations applied; triggers notify on channel '{}'",
        config.relay.channel
    );
    Ok(())
}
