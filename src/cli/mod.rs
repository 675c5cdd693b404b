//! CLI definitions for `hcctl`.

pub mod appliance;
pub mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ClientConfig;
use crate::error::Result;

/// Home Connect command-line client
#[derive(Parser, Debug)]
#[command(name = "hcctl", version, about = "Home Connect appliance cloud client")]
pub struct Cli {
    /// Talk to the simulator instead of production
    #[arg(long, global = true)]
    pub simulator: bool,

    /// Credential file (defaults to ~/.homeconnect/credentials.toml)
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorization management
    Auth(AuthArgs),
    /// List paired appliances
    Appliances,
    /// Show the status of one appliance
    Status(HaidArgs),
    /// Print the event stream of one appliance until interrupted
    Events(HaidArgs),
}

#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Authorize this client and store the credentials
    Login,
    /// Show stored credentials
    Status,
    /// Forget the stored credentials of this client
    Logout,
}

#[derive(Parser, Debug)]
pub struct HaidArgs {
    /// Appliance identifier
    pub haid: String,
}

impl Cli {
    /// Environment configuration with the command-line overrides applied.
    pub fn config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::from_env()?;
        if self.simulator {
            config.simulator = true;
        }
        if let Some(path) = &self.credentials {
            config.credentials_path = Some(path.clone());
        }
        Ok(config)
    }
}
