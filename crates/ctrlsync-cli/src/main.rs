//! ctrlsync - mirror and drive an embedded controller from the terminal

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use ctrlsync_cli::{
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::{CliAppConfig, CliOverrides},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(cli.verbose);
            error!("{}", e);
            std::process::exit(2);
        }
    };

    setup_logging(config.cli.verbose);

    if let Err(e) = CommandDispatcher::execute(cli.command, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("ctrlsync exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
///
/// Logs go to stderr so presenter output on stdout stays clean.
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Layer files, environment and flags into one configuration
fn load_configuration(cli: &Cli) -> std::result::Result<CliAppConfig, ctrlsync_cli::ConfigError> {
    let show_heartbeats = match cli.command {
        Commands::Watch { heartbeats: true } => Some(true),
        _ => None,
    };

    CliAppConfig::load_with_overrides(CliOverrides {
        config_file: cli.config.as_ref().map(PathBuf::from),
        host: cli.host.clone(),
        port: cli.port,
        verbose: cli.verbose.then_some(true),
        show_heartbeats,
    })
}
