//! `strata diff` — Export a layer as a tar stream.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use strata_common::config::DriverConfig;

use crate::output::format_bytes;

/// Arguments for the `diff` command.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Layer ID to export.
    pub id: String,

    /// Parent layer ID.
    #[arg(short, long, default_value = "")]
    pub parent: String,

    /// Write the tar stream to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Executes the `diff` command.
///
/// # Errors
///
/// Returns an error if the export fails or the stream cannot be written.
pub fn execute(config: &DriverConfig, args: &DiffArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);
    let mut stream = driver.diff(&args.id, &args.parent)?;

    let written = match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let written = std::io::copy(&mut stream, &mut file)?;
            file.flush()?;
            written
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            let written = std::io::copy(&mut stream, &mut stdout)?;
            stdout.flush()?;
            written
        }
    };
    stream.close()?;

    tracing::info!(id = %args.id, size = %format_bytes(written), "layer exported");
    Ok(())
}
