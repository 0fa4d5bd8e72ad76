//! `strata images` — List the image catalog.

use std::path::PathBuf;

use clap::Args;
use strata_common::constants::DEFAULT_CATALOG_DIR;
use strata_driver::ImageCatalog;

use crate::output::{format_bytes, short_id};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Image catalog directory.
    #[arg(long, default_value = DEFAULT_CATALOG_DIR)]
    pub catalog: PathBuf,

    /// Remove an image by ID.
    #[arg(long)]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
pub fn execute(args: &ImagesArgs) -> anyhow::Result<()> {
    let catalog = ImageCatalog::open(&args.catalog)?;

    if let Some(id) = &args.remove {
        catalog.remove(id)?;
        println!("Removed image {id}");
        return Ok(());
    }

    let images = catalog.list()?;
    if images.is_empty() {
        println!("No images found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<22} {:<10} {:>10}",
        "IMAGE ID", "CREATED", "ARCH", "SIZE"
    );
    for image in &images {
        println!(
            "{:<14} {:<22} {:<10} {:>10}",
            short_id(&image.id),
            image.created.format("%Y-%m-%d %H:%M:%S"),
            image.architecture,
            format_bytes(image.size)
        );
    }
    Ok(())
}
