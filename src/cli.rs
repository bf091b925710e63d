use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bridge-monitor")]
#[command(version)]
#[command(about = "Liveness monitor for bridges reporting over the portal stream", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, env = "BRIDGE_MONITOR_CONFIG", default_value = "config/bridge_monitor.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Connect to the portal and watch bridges (default)
    Run,
    /// Load and validate the config, then exit
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
