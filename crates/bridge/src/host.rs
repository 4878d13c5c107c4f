//! Host domain
//!
//! The host domain is the single cooperative execution context in which every
//! callback function runs. The bridge never runs callbacks itself; the
//! dispatcher hands each [`ExecutionTask`] to a [`HostDomain`], which is
//! responsible for running it on the host's own scheduler.
//!
//! [`local_host`] provides the tokio implementation: a [`HostHandle`] that the
//! dispatcher thread sends tasks through, and a [`HostRuntime`] that must be
//! driven inside a [`tokio::task::LocalSet`] on a current-thread runtime.
//! Each task is spawned as its own local task; because a task body is
//! synchronous it runs to completion within one poll, so two callbacks never
//! interleave with each other or with other host code.

use crate::error::{Error, Result};
use crate::execution::{ExecutionTask, Fault};
use crate::handlers::{LoggingResponseHandler, ResponseHandler};
use crate::registry::ChannelRegistry;
use async_channel::{Receiver, Sender, TrySendError, unbounded};
use protocol::ResponseEvent;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Scheduler seam between the dispatcher and the host domain
pub trait HostDomain: Send + Sync {
    /// Schedule `task` to run inside the host domain.
    ///
    /// A task that cannot be scheduled is dropped, which releases its waiting
    /// driver thread with [`Error::Abandoned`].
    fn schedule(&self, task: ExecutionTask) -> Result<()>;
}

/// Host-only state reachable from callback functions
///
/// Lives on the host thread; it is neither `Send` nor `Sync`, and callbacks
/// only ever see it through the `&HostContext` passed to their function.
pub struct HostContext {
    channels: ChannelRegistry,
    response_handler: RefCell<Rc<dyn ResponseHandler>>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext {
    pub fn new() -> Self {
        Self {
            channels: ChannelRegistry::new(),
            response_handler: RefCell::new(Rc::new(LoggingResponseHandler)),
        }
    }

    /// Channel registry used to route channel events
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Replace the device-wide response handler
    pub fn set_response_handler(&self, handler: Rc<dyn ResponseHandler>) {
        *self.response_handler.borrow_mut() = handler;
    }

    /// Deliver a response event to the response handler
    pub fn dispatch_response(&self, event: &ResponseEvent) -> bool {
        let handler = Rc::clone(&self.response_handler.borrow());
        handler.on_response(event.channel, event.message, &event.payload)
    }

    /// Device was reset: the driver has discarded every channel
    pub fn reset(&self) {
        let cleared = self.channels.clear_all();
        info!("Device reset, cleared {} channel(s)", cleared);
    }

    /// Connection to the device was closed: every channel is invalid
    pub fn close(&self) {
        let cleared = self.channels.clear_all();
        info!("Device connection closed, cleared {} channel(s)", cleared);
    }
}

/// Create a tokio-backed host domain
///
/// Returns (HostHandle for the dispatcher, HostRuntime for the host thread)
pub fn local_host() -> (HostHandle, HostRuntime) {
    let (task_tx, task_rx) = unbounded();
    (
        HostHandle { task_tx },
        HostRuntime {
            task_rx,
            context: Rc::new(HostContext::new()),
            fault_hook: None,
        },
    )
}

/// Sending side of the host domain (thread-safe)
#[derive(Clone, Debug)]
pub struct HostHandle {
    task_tx: Sender<ExecutionTask>,
}

impl HostHandle {
    /// Stop accepting tasks; the runtime finishes what it already received
    pub fn close(&self) {
        self.task_tx.close();
    }
}

impl HostDomain for HostHandle {
    fn schedule(&self, task: ExecutionTask) -> Result<()> {
        self.task_tx.try_send(task).map_err(|e| match e {
            TrySendError::Closed(task) => {
                Error::HostUnavailable(format!("host runtime closed, dropping {}", task.id()))
            }
            TrySendError::Full(task) => {
                Error::HostUnavailable(format!("host queue full, dropping {}", task.id()))
            }
        })
    }
}

/// Summary returned when the host runtime finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostReport {
    /// Tasks spawned in the host domain
    pub executed: u64,
    /// Faults re-raised by callbacks and observed here
    pub faults: u64,
}

/// Receiving side of the host domain; owns the host context
pub struct HostRuntime {
    task_rx: Receiver<ExecutionTask>,
    context: Rc<HostContext>,
    fault_hook: Option<Box<dyn FnMut(&Fault)>>,
}

impl HostRuntime {
    /// Shared handle to the host context, for host-side setup code
    pub fn context(&self) -> Rc<HostContext> {
        Rc::clone(&self.context)
    }

    /// Install host error handling for callback faults
    pub fn on_fault<F>(&mut self, hook: F)
    where
        F: FnMut(&Fault) + 'static,
    {
        self.fault_hook = Some(Box::new(hook));
    }

    /// Run execution tasks until every [`HostHandle`] is dropped or closed.
    ///
    /// Must be polled inside a `LocalSet`.
    pub async fn run(mut self) -> HostReport {
        let mut tasks = JoinSet::new();
        let mut report = HostReport::default();
        info!("Host domain running");

        loop {
            tokio::select! {
                received = self.task_rx.recv() => match received {
                    Ok(task) => {
                        let ctx = Rc::clone(&self.context);
                        tasks.spawn_local(async move { task.run(&ctx) });
                        report.executed += 1;
                    }
                    Err(_) => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.observe(joined, &mut report);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.observe(joined, &mut report);
        }

        info!(
            "Host domain stopped ({} executed, {} faults)",
            report.executed, report.faults
        );
        report
    }

    fn observe(&mut self, joined: std::result::Result<(), JoinError>, report: &mut HostReport) {
        let Err(err) = joined else {
            return;
        };
        if !err.is_panic() {
            debug!("Execution task cancelled: {}", err);
            return;
        }

        let payload = err.into_panic();
        let fault = Fault::from_panic(payload.as_ref());
        report.faults += 1;
        error!("Callback fault in host domain: {}", fault);
        if let Some(hook) = self.fault_hook.as_mut() {
            hook(&fault);
        }
    }
}
