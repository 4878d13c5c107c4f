//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings for a [`CallbackBridge`](crate::CallbackBridge)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Name given to the dispatcher OS thread
    #[serde(default = "BridgeConfig::default_thread_name")]
    pub dispatcher_thread_name: String,
    /// Maximum time a driver thread waits for its callback result
    /// (None = wait until the host has run the callback)
    #[serde(default)]
    pub handoff_timeout_ms: Option<u64>,
    /// Queue backlog above which a warning is logged on push
    #[serde(default = "BridgeConfig::default_queue_warn_depth")]
    pub queue_warn_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dispatcher_thread_name: Self::default_thread_name(),
            handoff_timeout_ms: None,
            queue_warn_depth: Self::default_queue_warn_depth(),
        }
    }
}

impl BridgeConfig {
    fn default_thread_name() -> String {
        "callback-dispatcher".to_string()
    }

    fn default_queue_warn_depth() -> usize {
        64
    }

    /// Handoff timeout as a Duration
    pub fn handoff_timeout(&self) -> Option<Duration> {
        self.handoff_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration values
    pub fn validate(&self) -> crate::Result<()> {
        if self.dispatcher_thread_name.trim().is_empty() {
            return Err(crate::Error::Config(
                "dispatcher_thread_name must not be empty".to_string(),
            ));
        }
        if self.handoff_timeout_ms == Some(0) {
            return Err(crate::Error::Config(
                "handoff_timeout_ms must be greater than 0 (omit it to wait forever)".to_string(),
            ));
        }
        if self.queue_warn_depth == 0 {
            return Err(crate::Error::Config(
                "queue_warn_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
