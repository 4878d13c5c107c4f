//! Callback dispatcher
//!
//! Dedicated thread that drains the callback queue and hands every unit to
//! the host domain as an [`ExecutionTask`]. It never runs a callback itself
//! and never waits for one to finish, so a slow or faulting callback cannot
//! stall intake of the next one.
//!
//! ```text
//!   Waiting --unit queued--> Running --scheduled--> Waiting
//!   Waiting --abort, queue drained--> Stopped
//! ```

use crate::execution::ExecutionTask;
use crate::host::HostDomain;
use crate::metrics::BridgeMetrics;
use crate::queue::{CallbackQueue, Next};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Observable dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    /// Blocked on the queue
    Waiting = 0,
    /// Handing a unit to the host domain
    Running = 1,
    /// Abort observed with an empty queue; terminal
    Stopped = 2,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Waiting,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    dispatched: AtomicU64,
}

impl Shared {
    fn set(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to the running dispatcher thread
#[derive(Debug)]
pub struct Dispatcher {
    queue: Arc<CallbackQueue>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatcher thread
    pub fn spawn<H>(
        name: &str,
        queue: Arc<CallbackQueue>,
        host: H,
        metrics: Arc<BridgeMetrics>,
    ) -> crate::Result<Self>
    where
        H: HostDomain + 'static,
    {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(DispatcherState::Waiting as u8),
            dispatched: AtomicU64::new(0),
        });

        let thread = {
            let queue = Arc::clone(&queue);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run(&queue, &host, &shared, &metrics))?
        };

        Ok(Self {
            queue,
            shared,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Units handed to the host domain so far
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Abort, let the dispatcher drain the queue, and join its thread.
    ///
    /// Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.queue.abort();
        if thread.join().is_err() {
            error!("Callback dispatcher thread panicked");
            self.shared.set(DispatcherState::Stopped);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<H: HostDomain>(
    queue: &CallbackQueue,
    host: &H,
    shared: &Shared,
    metrics: &Arc<BridgeMetrics>,
) {
    info!("Callback dispatcher started");

    while let Next::Unit(unit) = queue.wait_next() {
        shared.set(DispatcherState::Running);
        let id = unit.id();
        debug!(unit = %id, "Dispatching callback to host domain");

        let task = ExecutionTask::new(unit, Arc::clone(metrics));
        // A misbehaving host must not take the dispatcher down with it
        match catch_unwind(AssertUnwindSafe(|| host.schedule(task))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(unit = %id, "Host refused callback: {}", e),
            Err(_) => error!(unit = %id, "Panic while scheduling callback"),
        }

        shared.dispatched.fetch_add(1, Ordering::Relaxed);
        shared.set(DispatcherState::Waiting);
    }

    shared.set(DispatcherState::Stopped);
    info!(
        "Callback dispatcher stopped after {} callbacks",
        shared.dispatched.load(Ordering::Relaxed)
    );
}
