//! Binary crate for the `aqi` tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Serving the prediction endpoint over HTTP
//! - Interactive credential configuration

use clap::Parser;
use dotenv::dotenv;

mod cli;
mod error;
mod logging;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cmd = cli::Cli::parse();
    cmd.run().await
}
