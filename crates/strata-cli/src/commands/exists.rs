//! `strata exists` — Check whether a layer exists.

use clap::Args;
use strata_common::config::DriverConfig;

/// Arguments for the `exists` command.
#[derive(Args, Debug)]
pub struct ExistsArgs {
    /// Layer ID to check.
    pub id: String,
}

/// Executes the `exists` command.
///
/// Prints `true` or `false`; a missing layer is not an error.
#[allow(clippy::unnecessary_wraps)]
pub fn execute(config: &DriverConfig, args: &ExistsArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);
    println!("{}", driver.exists(&args.id));
    Ok(())
}
