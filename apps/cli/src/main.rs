//! nbpub CLI: fetch, package and execute example notebooks for the docs.
//!
//! Downloads example notebooks from the latest releases of the configured
//! repositories, bundles them as zip archives and Colab folders, and runs
//! them so the documentation can render their outputs.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
