//! Poll command: drive one engine from the command line

use clap::{Args, ValueEnum};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Cli, CliError};
use crate::endpoint::{ContinuationEndpoint, CursorEndpoint, Endpoint, SingleEndpoint};
use crate::engine::config::clamp_page_size;
use crate::transport::{BearerTransport, HttpTransport, StatusTable, Transport};
use crate::{EngineConfig, Method, RequestDescriptor, RequestEngine};

/// How often the command checks for a finished cycle
const CYCLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parse a `key=value` query parameter
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' is not of the form key=value"))?;
    if key.is_empty() {
        return Err(format!("'{s}' has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Pagination idiom of the polled endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PollMode {
    /// One request per cycle
    Single,
    /// Follow numeric cursors until 0
    Cursor,
    /// Follow continuation references
    Continuation,
}

/// Retry status table
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TableKind {
    /// Back off on 429 and 5xx only
    Generic,
    /// Quota-aware table with fixed waits for 400/420/403
    RateLimited,
}

impl TableKind {
    fn table(self) -> StatusTable {
        match self {
            TableKind::Generic => StatusTable::generic(),
            TableKind::RateLimited => StatusTable::rate_limited(),
        }
    }
}

/// Poll command arguments
#[derive(Args, Debug)]
pub struct PollArgs {
    /// Endpoint URL (`http://` is assumed when no scheme is given)
    pub url: String,

    /// Query parameter, repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// HTTP method
    #[arg(long, default_value = "GET")]
    pub method: Method,

    /// POST body; params then go in the query string
    #[arg(long)]
    pub payload: Option<String>,

    /// Pagination idiom
    #[arg(long, value_enum, default_value = "single")]
    pub mode: PollMode,

    /// Field holding the item list (continuation mode)
    #[arg(long, default_value = "statuses")]
    pub items_field: String,

    /// Retry status table
    #[arg(long, value_enum, default_value = "rate-limited")]
    pub table: TableKind,

    /// Cycles to run; 0 runs until Ctrl+C
    #[arg(long, default_value_t = 1)]
    pub cycles: u64,

    /// Trigger a cycle every N seconds instead of back to back
    #[arg(long)]
    pub interval: Option<u64>,

    /// Maximum random offset applied to each interval, in seconds
    #[arg(long, default_value_t = 0)]
    pub jitter: u64,

    /// Pace consecutive requests
    #[arg(long)]
    pub throttling: bool,

    /// Follow continuation references within a cycle
    #[arg(long)]
    pub continuation: bool,

    /// Most requests in one continuation burst
    #[arg(long)]
    pub continuation_max: Option<u32>,

    /// Page size sent as `count` (clamped to 1..=100)
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Transport calls per request (range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retry_attempts: Option<u32>,

    /// Bearer token sent with every request
    #[arg(long, env = "REST_POLLER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,
}

impl PollArgs {
    /// Merge flags over the loaded configuration
    fn effective_config(&self, mut config: EngineConfig) -> Result<EngineConfig, CliError> {
        config.throttling |= self.throttling;
        config.continuation |= self.continuation;
        if let Some(max) = self.continuation_max {
            config.continuation_max = max;
        }
        if let Some(size) = self.page_size {
            config.page_size = Some(clamp_page_size(size));
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(interval) = self.interval {
            if interval == 0 {
                return Err(CliError::InvalidArgument("--interval must be positive".to_string()));
            }
            config.timer_interval_ms = Some(interval.saturating_mul(1000));
            config.timer_jitter_ms = self.jitter.saturating_mul(1000);
        }
        config.validate()?;
        Ok(config)
    }

    fn descriptor(&self) -> Result<RequestDescriptor, CliError> {
        if self.method == Method::Get && self.payload.is_some() {
            return Err(CliError::InvalidArgument("--payload requires --method POST".to_string()));
        }
        let descriptor = match self.method {
            Method::Get => RequestDescriptor::get(&self.url),
            Method::Post => RequestDescriptor::post(&self.url, self.payload.clone()),
        };
        let descriptor = self
            .params
            .iter()
            .fold(descriptor, |d, (k, v)| d.with_param(k.clone(), v.clone()));
        descriptor
            .validate()
            .map_err(CliError::InvalidArgument)?;
        Ok(descriptor)
    }

    fn endpoint(&self) -> Arc<dyn Endpoint> {
        let table = self.table.table();
        match self.mode {
            PollMode::Single => Arc::new(SingleEndpoint::default().with_status_table(table)),
            PollMode::Cursor => Arc::new(CursorEndpoint::default().with_status_table(table)),
            PollMode::Continuation => Arc::new(
                ContinuationEndpoint::default()
                    .with_items_field(self.items_field.clone())
                    .with_status_table(table),
            ),
        }
    }

    /// Execute the poll command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = self.effective_config(cli.load_config()?)?;
        let descriptor = self.descriptor()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.http)?);

        let mut builder = RequestEngine::builder(self.endpoint(), transport).descriptor(descriptor);
        if let Some(token) = &self.bearer_token {
            let inner = HttpTransport::new(&config.http)?;
            builder = builder.authenticator(Arc::new(BearerTransport::new(inner, token.clone())));
        }
        let manual = config.timer_interval().is_none();
        let engine = builder.config(config).build();

        engine.start()?;
        info!(url = %self.url, mode = ?self.mode, cycles = self.cycles, "Polling");

        let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
        let mut seen = 0;
        loop {
            if manual {
                engine.signal();
            }
            tokio::select! {
                _ = wait_for_cycle(&engine, seen) => {}
                _ = &mut ctrl_c => {
                    warn!("Ctrl+C received, stopping after the current cycle");
                    break;
                }
            }
            seen = engine.cycles_completed();
            emit_messages(&engine)?;

            if !engine.is_running() {
                warn!("Engine stopped unexpectedly");
                break;
            }
            if self.cycles != 0 && seen >= self.cycles {
                break;
            }
        }

        engine.shutdown().await;
        emit_messages(&engine)?;
        report_last_request(&engine);
        Ok(())
    }
}

async fn wait_for_cycle(engine: &RequestEngine, seen: u64) {
    while engine.cycles_completed() <= seen && engine.is_running() {
        tokio::time::sleep(CYCLE_POLL_INTERVAL).await;
    }
}

fn emit_messages(engine: &RequestEngine) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for message in engine.messages() {
        writeln!(out, "{message}")?;
    }
    out.flush()?;
    Ok(())
}

fn report_last_request(engine: &RequestEngine) {
    if let Some(warning) = engine.last_warning() {
        eprintln!("warning: {warning}");
    }
    if let Some(error) = engine.last_error() {
        eprintln!("error: {error}");
    }
    if engine.dropped_messages() > 0 {
        eprintln!("dropped {} message(s) on a full queue", engine.dropped_messages());
    }
}
