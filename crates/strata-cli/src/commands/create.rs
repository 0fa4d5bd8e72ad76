//! `strata create` — Create a layer on top of a parent.

use clap::Args;
use strata_common::config::DriverConfig;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// ID of the new layer.
    pub id: String,

    /// Parent layer ID; omit for a base layer.
    #[arg(short, long, default_value = "")]
    pub parent: String,
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if the layer cannot be created.
pub fn execute(config: &DriverConfig, args: &CreateArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);
    driver.create(&args.id, &args.parent)?;
    println!("{}", args.id);
    Ok(())
}
