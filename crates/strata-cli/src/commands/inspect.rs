//! `strata inspect` — Show a layer's identity and ancestor chain.

use clap::Args;
use strata_common::config::DriverConfig;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Layer ID to inspect.
    pub id: String,

    /// Print as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the alias or chain file cannot be read.
pub fn execute(config: &DriverConfig, args: &InspectArgs) -> anyhow::Result<()> {
    let driver = super::open_driver(config);
    let real = driver.resolve(&args.id)?;
    let chain = driver.layer_chain(&args.id)?;
    let metadata = driver.metadata(&args.id);

    if args.json {
        let value = serde_json::json!({
            "id": args.id,
            "real_id": real,
            "exists": driver.exists(&args.id),
            "metadata": metadata,
            "chain": chain,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{:<10} {}", "ID", args.id);
    println!("{:<10} {real}", "REAL ID");
    println!("{:<10} {}", "EXISTS", driver.exists(&args.id));
    if let Some(dir) = metadata.get("dir") {
        println!("{:<10} {dir}", "DIR");
    }
    if chain.is_empty() {
        println!("{:<10} (base layer)", "CHAIN");
    }
    for (depth, path) in chain.iter().enumerate() {
        println!("{:<10} {depth}: {path}", if depth == 0 { "CHAIN" } else { "" });
    }
    Ok(())
}
