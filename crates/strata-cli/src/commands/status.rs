//! `strata status` — Show driver status.

use clap::Args;
use strata_common::config::DriverConfig;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print status as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the driver state cannot be read.
pub fn execute(config: &DriverConfig, args: &StatusArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);
    let status = driver.status()?;

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = status
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    for (key, value) in &status {
        println!("{key:<15} {value}");
    }
    Ok(())
}
