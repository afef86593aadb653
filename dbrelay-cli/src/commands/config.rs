//! Inspect the effective configuration

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbrelay_core::RelayConfig;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML (password redacted)
    Show,
}

pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => run_show(config_path),
    }
}

fn run_show(config_path: Option<&Path>) -> Result<()> {
    let config = RelayConfig::load(config_path).context("failed to load configuration")?;
    let rendered = render(&config)?;
    print!("{rendered}");
    Ok(())
}

fn render(config: &RelayConfig) -> Result<String> {
    toml::to_string_pretty(&config.redacted()).context("failed to render configuration")
}
