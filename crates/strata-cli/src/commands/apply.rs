//! `strata apply` — Import a tar stream as a layer.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use strata_common::config::DriverConfig;

use crate::output::format_bytes;

/// Arguments for the `apply` command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// ID of the layer to populate.
    pub id: String,

    /// Parent layer ID.
    #[arg(short, long, default_value = "")]
    pub parent: String,

    /// Read the tar stream from this file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

/// Executes the `apply` command.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or imported.
pub fn execute(config: &DriverConfig, args: &ApplyArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);

    let size = match &args.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            driver.apply_diff(&args.id, &args.parent, file)?
        }
        None => driver.apply_diff(&args.id, &args.parent, std::io::stdin().lock())?,
    };

    println!("Applied {} to {}", format_bytes(size), args.id);
    Ok(())
}
