//! ## cransim-cli
//! **Archive replay server entrypoint**
//!
//! Replays day-partitioned CRAN download logs at their original cadence,
//! shifted into the past, to every connected TCP subscriber.

use clap::Parser;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
