//! Request engine
//!
//! The engine runs one background worker per instance. The worker blocks on
//! a [`RequestGate`] until a caller (or a [`PeriodicTrigger`]) opens it, then
//! runs one full request cycle: it builds the request, sends it under the
//! retry policy, queues the decoded messages, and follows cursors or
//! continuation references, pacing with the [`ThrottleController`] between
//! pages.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rest_poller::endpoint::CursorEndpoint;
//! use rest_poller::engine::{EngineConfig, RequestEngine};
//! use rest_poller::transport::HttpTransport;
//! use rest_poller::RequestDescriptor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig {
//!     throttling: true,
//!     ..EngineConfig::default()
//! };
//! let engine = RequestEngine::builder(
//!     Arc::new(CursorEndpoint::new("followers")),
//!     Arc::new(HttpTransport::new(&config.http)?),
//! )
//! .config(config)
//! .descriptor(RequestDescriptor::get("https://api.example.com/followers/ids.json"))
//! .trigger(Duration::from_secs(900), Duration::from_secs(30))
//! .build();
//!
//! engine.start()?;
//! engine.wait_for_result().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`config`] - Configuration, defaults and backoff calculation
//! - [`gate`] - Single-slot hand-off between signalers and the worker
//! - [`throttle`] - Fixed and quota-aware pacing
//! - [`trigger`] - Optional jittered periodic trigger
//! - [`worker`] - The engine, its builder and the request cycle
//!
//! # Error Handling
//!
//! Request failures never surface as `Err`: they are recorded on the request
//! history and read back with `last_error()` / `last_warning()`. The
//! [`EngineError`] variants cover misuse of the engine itself.

pub mod config;
pub mod gate;
pub mod throttle;
pub mod trigger;
pub mod worker;

pub use config::EngineConfig;
pub use gate::RequestGate;
pub use throttle::{ThrottleController, ThrottleMode};
pub use trigger::{PeriodicTrigger, TriggerTarget};
pub use worker::{CycleReport, EngineBuilder, RequestEngine};

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A request cycle is in flight
    #[error("a request cycle is in progress")]
    Busy,

    /// Worker (or trigger) already running
    #[error("engine is already running")]
    AlreadyRunning,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Not called from within a tokio runtime
    #[error("no tokio runtime available")]
    NoRuntime,
}
