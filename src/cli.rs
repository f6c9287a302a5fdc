// CLI definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cp02")]
#[command(author, version, about = "CP02 fast-charging station control and aggregation")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML config file (defaults to the OS config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a BLE station and serve the client-facing HTTP/WS interface
    #[command(visible_alias = "serve")]
    Adapter {
        /// BLE device address to connect to (scans for the first CP02- match if omitted)
        #[arg(long)]
        address: Option<String>,
    },

    /// Run as an aggregator fronting remote gateways over MQTT, with no local BLE session
    #[command(visible_alias = "agg")]
    Aggregator,

    /// Print an action's result once and exit (requires a running adapter's local state)
    Call {
        /// Action name, e.g. `get_model` or `turn_on`
        action: String,
        /// JSON params object
        #[arg(default_value = "{}")]
        params: String,
    },

    /// List every action the dispatcher accepts
    #[command(visible_alias = "ls")]
    Actions,

    /// Write the default configuration to the resolved config path
    InitConfig,
}
