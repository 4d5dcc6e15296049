//! Obituary discovery CLI.
//!
//! Finds fresh public claims that AI is overhyped or doomed, classifies them,
//! and files the notable ones as drafts in the content store.

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
