//! snowdrift: write NDJSON records into a partitioned table with exactly-once
//! commits.
//!
//! Records are staged per worker attempt, then published by renaming each
//! staged file into its partition directory once the batch is closed.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;

use snowdrift::config::SinkConfig;
use snowdrift::error::{ConfigSnafu, SinkError};
use snowdrift::logging::init_tracing;
use snowdrift::pipeline::run_sink;

/// Partitioned NDJSON file sink.
#[derive(Parser, Debug)]
#[command(name = "snowdrift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "SNOWDRIFT_CONFIG")]
    config: PathBuf,

    /// Validate the configuration without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// NDJSON input files.
    #[arg(required_unless_present = "dry_run")]
    inputs: Vec<PathBuf>,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), SinkError> {
    let args = Args::parse();
    init_tracing();

    info!("snowdrift starting");

    let config = SinkConfig::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Table: {}", config.table_uri);
        info!("Strategy: {}", config.strategy);
        info!("Partition columns: {:?}", config.partition_columns);
        info!("Attempt: {}", config.task_attempt());
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_sink(&config, &args.inputs).await?;

    info!("Sink completed successfully");
    info!("  Records written: {}", stats.records_written);
    info!("  Batches committed: {}", stats.batches_committed);
    info!("  Files committed: {}", stats.files_committed);
    info!("  Files discarded: {}", stats.files_discarded);

    Ok(())
}
