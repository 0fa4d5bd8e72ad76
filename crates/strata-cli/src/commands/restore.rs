//! `strata restore` — Register host base images in the image catalog.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use strata_common::config::DriverConfig;
use strata_common::constants::DEFAULT_CATALOG_DIR;
use strata_driver::{FolderPrimitive, ImageCatalog};

/// Arguments for the `restore` command.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Base-image listing (JSON) reported by the host.
    #[arg(short, long)]
    pub listing: PathBuf,

    /// Image catalog directory.
    #[arg(long, default_value = DEFAULT_CATALOG_DIR)]
    pub catalog: PathBuf,
}

/// Executes the `restore` command.
///
/// # Errors
///
/// Returns an error if the listing cannot be read or an image cannot be
/// registered.
pub fn execute(config: &DriverConfig, args: &RestoreArgs) -> anyhow::Result<()> {
    let listing = std::fs::read_to_string(&args.listing)
        .with_context(|| format!("failed to read {}", args.listing.display()))?;
    let primitive = FolderPrimitive::new(&config.home, config.flavour).with_base_images(listing);
    let driver = super::open_driver_with(config, primitive);
    let catalog = ImageCatalog::open(&args.catalog)?;

    let restored = driver.restore_base_images(&catalog)?;
    if restored.is_empty() {
        println!("No new base images.");
    }
    for id in &restored {
        println!("{id}");
    }
    Ok(())
}
