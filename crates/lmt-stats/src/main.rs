mod bootstrap;
mod cli;

use anyhow::Result;
use clap::Parser;
use lmt_data::analysis::Dataset;

use crate::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    bootstrap::setup_logging(&args.log_level)?;

    tracing::info!("lmt-stats v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = bootstrap::load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;

    let filter = args.filter_spec();
    let dimension = args.dimension()?;

    let files = bootstrap::discover_exports(&args.path)?;
    let dataset = Dataset::load_paths(&files, &config)?;

    let output = match dimension {
        Some(dimension) => {
            let table = dataset.aggregate(&filter, dimension)?;
            tracing::info!("{} groups by {}", table.len(), dimension);
            render(&table, args.compact)?
        }
        None => {
            let report = dataset.summarize(&filter)?;
            tracing::info!(
                "Report over {} records on {} servers",
                report.headline.records,
                report.headline.servers
            );
            render(&report, args.compact)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn render<T: serde::Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}
