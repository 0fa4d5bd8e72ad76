//! CLI command definitions and dispatch.

pub mod apply;
pub mod create;
pub mod diff;
pub mod exists;
pub mod images;
pub mod inspect;
pub mod remove;
pub mod restore;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use strata_common::config::{DriverConfig, Flavour};
use strata_driver::{Driver, FolderPrimitive};

/// Strata — layered-filesystem driver over a copy-on-write primitive.
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Driver configuration file (JSON).
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Driver home directory, overriding the configuration file.
    #[arg(long, global = true, env = "STRATA_HOME")]
    pub home: Option<PathBuf>,

    /// Driver flavour (`windowsfilter` or `windowsdiff`).
    #[arg(long, global = true)]
    pub flavour: Option<Flavour>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show driver status.
    Status(status::StatusArgs),
    /// Create a layer on top of a parent.
    Create(create::CreateArgs),
    /// Remove a layer.
    Remove(remove::RemoveArgs),
    /// Check whether a layer exists.
    Exists(exists::ExistsArgs),
    /// Show a layer's real ID, directory, and ancestor chain.
    Inspect(inspect::InspectArgs),
    /// Export a layer as a tar stream.
    Diff(diff::DiffArgs),
    /// Import a tar stream as a layer.
    Apply(apply::ApplyArgs),
    /// Register host base images in the image catalog.
    Restore(restore::RestoreArgs),
    /// List the image catalog.
    Images(images::ImagesArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = driver_config(&cli)?;
    tracing::debug!(home = %config.home.display(), flavour = %config.flavour, "resolved driver config");

    match cli.command {
        Command::Status(args) => status::execute(&config, &args),
        Command::Create(args) => create::execute(&config, &args),
        Command::Remove(args) => remove::execute(config, &args),
        Command::Exists(args) => exists::execute(&config, &args),
        Command::Inspect(args) => inspect::execute(&config, &args),
        Command::Diff(args) => diff::execute(&config, &args),
        Command::Apply(args) => apply::execute(&config, &args),
        Command::Restore(args) => restore::execute(&config, &args),
        Command::Images(args) => images::execute(&args),
    }
}

/// Builds the driver configuration from the config file and overrides.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
pub fn driver_config(cli: &Cli) -> anyhow::Result<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DriverConfig::default(),
    };
    if let Some(home) = &cli.home {
        config.home.clone_from(home);
    }
    if let Some(flavour) = cli.flavour {
        config.flavour = flavour;
    }
    Ok(config)
}

/// Opens a driver over the folder primitive rooted at the configured home.
pub fn open_driver(config: &DriverConfig) -> Driver {
    open_driver_with(config, FolderPrimitive::new(&config.home, config.flavour))
}

/// Opens a driver over an already configured folder primitive.
pub fn open_driver_with(config: &DriverConfig, primitive: FolderPrimitive) -> Driver {
    Driver::new(config.clone(), Arc::new(primitive))
}
