//! CLI command definitions and dispatch.

mod machine_env;
mod provision;
mod relay;

use std::path::{Path, PathBuf};

use anyhow::Context;
use boxcall_core::BoxcallConfig;
use clap::{Parser, Subcommand};

/// Boxcall: run Rust functions in provisioned container images.
#[derive(Parser)]
#[command(name = "boxcall", version, about)]
pub struct Cli {
    /// Configuration file (default: ~/.boxcall/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an image with job inputs copied into a working directory
    Provision(provision::ProvisionArgs),
    /// Show the daemon environment of a docker-machine host
    MachineEnv(machine_env::MachineEnvArgs),
    /// Read the outputs of a finished remote call
    Relay(relay::RelayArgs),
}

/// Load configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BoxcallConfig> {
    match path {
        Some(path) => BoxcallConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => BoxcallConfig::load_default().context("Failed to load default config"),
    }
}

/// Dispatch a parsed command.
pub fn dispatch(cli: Cli, config: &BoxcallConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Provision(args) => provision::execute(args, config),
        Command::MachineEnv(args) => machine_env::execute(args),
        Command::Relay(args) => relay::execute(args),
    }
}
