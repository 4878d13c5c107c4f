//! Cross-thread callback bridge for ANT device drivers
//!
//! Driver threads receive radio events on their own OS threads, but the
//! handlers that consume them live in a single host domain that must not be
//! entered from foreign threads. This crate moves each callback across:
//!
//! ```text
//!  driver thread          dispatcher thread          host domain
//!  ─────────────          ─────────────────          ───────────
//!  submit(unit) ──push──▶ CallbackQueue
//!       │                 wait_next ──schedule──▶ ExecutionTask::run
//!       │                                             │ handler(ctx, payload)
//!  Waiter::wait ◀────────────── Signal::signal ◀──────┘
//! ```
//!
//! The driver blocks until its callback has run and gets the handler's
//! result back. A panicking handler is reported to the driver as a
//! [`Error::Fault`] and re-raised inside the host domain.
//!
//! The host side of the bridge is pluggable through [`HostDomain`];
//! [`local_host`] provides a tokio `LocalSet` based implementation that owns
//! the [`ChannelRegistry`] and response handler.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod handoff;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod test_utils;
pub mod unit;

pub use bridge::{CallbackBridge, DriverEndpoint};
pub use config::BridgeConfig;
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::{Error, Result};
pub use execution::{ExecutionTask, Fault};
pub use handlers::{
    ChannelHandler, LoggingEventHandler, LoggingResponseHandler, ResponseHandler, ResponseSummary,
    channel_handler, response_handler,
};
pub use host::{HostContext, HostDomain, HostHandle, HostReport, HostRuntime, local_host};
pub use logging::setup_logging;
pub use metrics::{BridgeMetrics, LatencyStats, MetricsSnapshot};
pub use queue::CallbackQueue;
pub use registry::ChannelRegistry;
pub use unit::{CallbackUnit, PendingUnit, UnitId};
