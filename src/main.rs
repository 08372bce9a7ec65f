mod classify;
mod cli;
mod cli_cmds;
mod config;
mod control;
mod decision;
mod device;
mod orchestrator;
mod status;
mod utils;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
