//! `strata remove` — Remove a layer.

use clap::Args;
use strata_common::config::DriverConfig;

/// Arguments for the `remove` command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Layer ID to remove.
    pub id: String,

    /// Also delete the layer's alias and chain files.
    #[arg(long)]
    pub purge: bool,
}

/// Executes the `remove` command.
///
/// # Errors
///
/// Returns an error if the layer cannot be removed.
pub fn execute(mut config: DriverConfig, args: &RemoveArgs) -> anyhow::Result<()> {
    config.purge_metadata_on_remove |= args.purge;
    let driver = super::open_driver(&config);
    driver.remove(&args.id)?;
    println!("Removed {}", args.id);
    Ok(())
}
