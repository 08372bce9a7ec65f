use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use super::{Cli, Commands};
use crate::cli_cmds::*;
use crate::config::{Config, Overrides};

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();

    let overrides = Overrides {
        url: cli.url.clone(),
        device: cli.device.clone(),
        ignore_cec: cli.ignore_cec,
        debug: cli.show_debug,
    };
    let config = Config::resolve(cli.config.as_deref(), &overrides)?;
    init_tracing(config.debug);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            cmd_run(&config).await?;
        }
        Commands::List => {
            cmd_list().await?;
        }
        Commands::Cast => {
            cmd_cast(&config).await?;
        }
        Commands::Config { save } => {
            cmd_config(&config, cli.config.as_deref(), save)?;
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
