//! Execution tasks
//!
//! An [`ExecutionTask`] is what the dispatcher hands to the host domain for
//! each dequeued unit. Running it invokes the unit's function, signals the
//! waiting driver thread, and only then re-raises a captured panic so the
//! host's own error handling sees it while the driver is already unblocked.

use crate::host::HostContext;
use crate::metrics::BridgeMetrics;
use crate::unit::{PendingUnit, UnitId};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A panic raised by a host-side callback function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extract a readable message from a panic payload
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            Self::new(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::new(s.clone())
        } else {
            Self::new("callback panicked with a non-string payload")
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {}

/// One dequeued unit, ready to run inside the host domain
pub struct ExecutionTask {
    unit: PendingUnit,
    metrics: Arc<BridgeMetrics>,
}

impl ExecutionTask {
    pub(crate) fn new(unit: PendingUnit, metrics: Arc<BridgeMetrics>) -> Self {
        Self { unit, metrics }
    }

    pub fn id(&self) -> UnitId {
        self.unit.id
    }

    /// Run the unit against the host context.
    ///
    /// Must only be called from the host domain. If the callback panicked the
    /// panic is resumed after the handoff has been signaled.
    pub fn run(self, ctx: &HostContext) {
        let ExecutionTask { unit, metrics } = self;
        let PendingUnit {
            id,
            submitted_at,
            job,
        } = unit;

        debug!(unit = %id, "Executing callback");
        let fault = job.run(ctx, &|success| {
            metrics.record_executed(submitted_at.elapsed(), success)
        });

        if let Some(payload) = fault {
            warn!(
                unit = %id,
                "Callback faulted: {}",
                Fault::from_panic(payload.as_ref())
            );
            std::panic::resume_unwind(payload);
        }
    }
}

impl fmt::Debug for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTask")
            .field("unit", &self.unit.id)
            .finish()
    }
}
