//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Controller host (overrides configuration)
    #[arg(long)]
    pub host: Option<String>,

    /// Controller port (overrides configuration)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stay connected and print status, state changes and alerts
    Watch {
        /// Also print every heartbeat probe and acknowledgement
        #[arg(long)]
        heartbeats: bool,
    },
    /// Set a controller variable and exit
    Set {
        /// Dotted variable path, e.g. ecu.idle
        path: String,
        /// Value: true/false, null, a number, or text
        value: String,
    },
    /// Invoke a controller action and exit
    Action {
        /// Action identifier, e.g. ifconfig or nettime
        id: String,
        /// Extra fields as KEY=VALUE
        fields: Vec<String>,
        /// Reset the session after sending
        #[arg(long)]
        reset: bool,
    },
    /// Read commands from stdin while watching the controller
    Interactive,
    /// Print an example configuration file
    Config {
        /// Print the loaded configuration instead of the example
        #[arg(long)]
        effective: bool,
    },
}
