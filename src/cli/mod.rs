//! CLI command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::EngineConfig;

pub mod config;
pub mod error;
pub mod poll;

pub use config::ConfigCommand;
pub use error::CliError;
pub use poll::PollArgs;

/// Single-flight poller for rate-limited, paginated REST APIs
#[derive(Parser, Debug)]
#[command(name = "rest-poller", version, about, long_about = None)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (JSON); flags override its values
    #[arg(long, global = true, env = "REST_POLLER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true, env = "REST_POLLER_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Configuration from `--config`, or the defaults
    pub fn load_config(&self) -> Result<EngineConfig, CliError> {
        match &self.config {
            Some(path) => Ok(EngineConfig::from_file(path)?),
            None => Ok(EngineConfig::default()),
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll an endpoint and print each message as a JSON line
    Poll(PollArgs),

    /// Inspect the engine configuration
    Config(ConfigCommand),
}
