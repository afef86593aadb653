//! dbrelay CLI - PostgreSQL change relay
//!
//! - `serve`: run the WebSocket change feed and admin API
//! - `migrate`: create tables and notify triggers
//! - `config show`: print the effective configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod tracing_setup;

use tracing_setup::{LogFormat, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "dbrelay",
    author,
    version,
    about = "Relay PostgreSQL row changes to WebSocket subscribers",
    long_about = "Listens on a PostgreSQL NOTIFY channel and pushes every row change to all \
                  connected WebSocket clients, alongside a small admin HTTP API."
)]
struct Cli {
    /// Config file (default: $DBRELAY_CONFIG or ./dbrelay.toml)
    #[arg(long, short = 'c', global = true, env = "DBRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the change relay and HTTP server
    ///
    /// Only a primary process listens for changes and relays them to
    /// WebSocket subscribers. Pass `--primary true` (or set
    /// DBRELAY_RUN_MAIN=true) when the role is not inferred from the
    /// environment.
    Serve(commands::serve::ServeArgs),
    /// Create tables and install notify triggers
    Migrate(commands::migrate::MigrateArgs),
    /// Inspect configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_setup::init(&TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
        format: cli.log_format,
    })
    .ok();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Serve(args) => commands::run_serve(args, config_path).await,
        Commands::Migrate(args) => commands::run_migrate(args, config_path).await,
        Commands::Config(args) => commands::run_config(args, config_path),
    };

    tracing_setup::shutdown_otel();
    result
}
