//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Event for a channel the registry does not know about
    #[error("Unknown channel: {0}")]
    UnknownChannel(protocol::ChannelId),

    /// The host-side function panicked while executing a callback
    #[error("Callback fault: {0}")]
    Fault(String),

    /// The host domain discarded the callback without running it
    #[error("Callback abandoned before execution")]
    Abandoned,

    /// The handoff wait exceeded the configured timeout
    #[error("Timed out after {0:?} waiting for callback result")]
    Timeout(std::time::Duration),

    /// The dispatcher has stopped and no longer accepts work
    #[error("Callback bridge is shut down")]
    ShutDown,

    /// The host domain is gone and cannot schedule work
    #[error("Host domain unavailable: {0}")]
    HostUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
