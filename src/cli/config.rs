//! Config command: print the effective engine configuration

use clap::{Args, Subcommand};

use super::{Cli, CliError};

/// Config subcommand
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the configuration after defaults and `--config` are applied
    Show,
}

impl ConfigCommand {
    /// Execute the config command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        match self.action {
            ConfigAction::Show => {
                let config = cli.load_config()?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}
