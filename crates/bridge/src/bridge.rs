//! Callback bridge lifecycle and driver endpoint
//!
//! [`CallbackBridge`] owns the queue and the dispatcher thread. Driver
//! threads get a cloneable [`DriverEndpoint`] that submits callbacks and
//! blocks until the host domain has produced their result.

use crate::config::BridgeConfig;
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::error::{Error, Result};
use crate::handoff;
use crate::host::HostDomain;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::queue::{CallbackQueue, Rejected};
use crate::unit::{CallbackUnit, PendingUnit, UnitId};
use protocol::{ChannelEvent, ResponseEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A running callback bridge
///
/// Dropping the bridge shuts it down the same way [`shutdown`](Self::shutdown)
/// does, minus the returned snapshot.
#[derive(Debug)]
pub struct CallbackBridge {
    dispatcher: Dispatcher,
    queue: Arc<CallbackQueue>,
    metrics: Arc<BridgeMetrics>,
    endpoint: DriverEndpoint,
}

impl CallbackBridge {
    /// Start the dispatcher thread in front of `host`
    pub fn start<H>(config: &BridgeConfig, host: H) -> Result<Self>
    where
        H: HostDomain + 'static,
    {
        config.validate()?;

        let queue = Arc::new(CallbackQueue::new(config.queue_warn_depth));
        let metrics = Arc::new(BridgeMetrics::new());
        let dispatcher = Dispatcher::spawn(
            &config.dispatcher_thread_name,
            Arc::clone(&queue),
            host,
            Arc::clone(&metrics),
        )?;

        let endpoint = DriverEndpoint {
            queue: Arc::clone(&queue),
            metrics: Arc::clone(&metrics),
            next_id: Arc::new(AtomicU64::new(1)),
            timeout: config.handoff_timeout(),
        };

        info!(
            "Callback bridge started (dispatcher thread '{}')",
            config.dispatcher_thread_name
        );

        Ok(Self {
            dispatcher,
            queue,
            metrics,
            endpoint,
        })
    }

    /// A handle for driver threads
    pub fn endpoint(&self) -> DriverEndpoint {
        self.endpoint.clone()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    /// Units waiting for the dispatcher
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the dispatcher after it has handed every queued unit to the host.
    ///
    /// Submissions racing with shutdown either make it into the drain or
    /// fail with [`Error::ShutDown`].
    pub fn shutdown(mut self) -> MetricsSnapshot {
        info!("Shutting down callback bridge ({} queued)", self.queue.len());
        self.dispatcher.stop();
        let snapshot = self.metrics.snapshot();
        info!(
            "Callback bridge stopped: {} submitted, {} completed, {} faulted",
            snapshot.submitted, snapshot.completed, snapshot.faulted
        );
        snapshot
    }
}

/// Driver-side handle to the bridge (thread-safe, cheap to clone)
#[derive(Debug, Clone)]
pub struct DriverEndpoint {
    queue: Arc<CallbackQueue>,
    metrics: Arc<BridgeMetrics>,
    next_id: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

impl DriverEndpoint {
    /// Run `unit` in the host domain and block until its result is back.
    ///
    /// Returns the host function's value, or [`Error::Fault`] if it panicked,
    /// [`Error::Abandoned`] if the host dropped it unrun, [`Error::Timeout`]
    /// if a handoff timeout is configured and expires, and
    /// [`Error::ShutDown`] once the bridge has stopped.
    pub fn submit<P, R>(&self, unit: CallbackUnit<P, R>) -> Result<R>
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        let id = UnitId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (signal, waiter) = handoff::channel();
        self.metrics.record_submitted();

        if let Err(Rejected(unit)) = self.queue.push(PendingUnit::bind(id, unit, signal)) {
            // Consumes the signal without running anything
            drop(unit);
            self.metrics.record_rejected();
            debug!(unit = %id, "Callback rejected, bridge is shut down");
            return Err(Error::ShutDown);
        }

        let result = match self.timeout {
            Some(timeout) => waiter.wait_timeout(timeout),
            None => waiter.wait(),
        };

        match &result {
            Err(Error::Abandoned) => {
                self.metrics.record_abandoned();
                warn!(unit = %id, "Callback abandoned by host domain");
            }
            Err(Error::Timeout(after)) => {
                self.metrics.record_timeout();
                warn!(unit = %id, "No callback result after {:?}", after);
            }
            _ => {}
        }
        result
    }

    /// Deliver a channel event to its registered handler.
    ///
    /// Returns the handler's answer; unknown channels, faulting handlers and
    /// a stopped bridge all answer `false` so the driver can carry on.
    pub fn on_channel_event(&self, event: ChannelEvent) -> bool {
        let metrics = Arc::clone(&self.metrics);
        let unit = CallbackUnit::new(event, move |ctx, event: ChannelEvent| {
            match ctx.channels().dispatch(&event) {
                Ok(handled) => handled,
                Err(e @ Error::UnknownChannel(_)) => {
                    metrics.record_routing_error();
                    warn!(
                        channel = %event.channel,
                        "Dropping {}: {}", event.event, e
                    );
                    false
                }
                Err(e) => {
                    warn!(
                        channel = %event.channel,
                        "Rejected {}: {}", event.event, e
                    );
                    false
                }
            }
        });

        self.submit(unit).unwrap_or_else(|e| {
            debug!("Channel event not handled: {}", e);
            false
        })
    }

    /// Deliver a response to the device-wide response handler
    pub fn on_response(&self, event: ResponseEvent) -> bool {
        let unit = CallbackUnit::new(event, |ctx, event: ResponseEvent| {
            ctx.dispatch_response(&event)
        });

        self.submit(unit).unwrap_or_else(|e| {
            debug!("Response not handled: {}", e);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionTask;
    use crate::host::HostContext;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Mutex;
    use std::sync::mpsc;

    /// Executes every task on one thread owning a host context
    struct InlineHost {
        tx: Mutex<mpsc::Sender<ExecutionTask>>,
    }

    fn inline_host() -> InlineHost {
        let (tx, rx) = mpsc::channel::<ExecutionTask>();
        std::thread::spawn(move || {
            let ctx = HostContext::new();
            for task in rx {
                let _ = catch_unwind(AssertUnwindSafe(|| task.run(&ctx)));
            }
        });
        InlineHost { tx: Mutex::new(tx) }
    }

    impl HostDomain for InlineHost {
        fn schedule(&self, task: ExecutionTask) -> Result<()> {
            self.tx
                .lock()
                .unwrap()
                .send(task)
                .map_err(|_| Error::HostUnavailable("inline host gone".into()))
        }
    }

    /// Accepts tasks and drops them unrun
    struct DiscardingHost;

    impl HostDomain for DiscardingHost {
        fn schedule(&self, _task: ExecutionTask) -> Result<()> {
            Ok(())
        }
    }

    /// Holds tasks forever so drivers never hear back
    struct StallingHost {
        held: Mutex<Vec<ExecutionTask>>,
    }

    impl HostDomain for StallingHost {
        fn schedule(&self, task: ExecutionTask) -> Result<()> {
            self.held.lock().unwrap().push(task);
            Ok(())
        }
    }

    #[test]
    fn test_submit_returns_host_value() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), inline_host()).unwrap();
        let endpoint = bridge.endpoint();

        let len = endpoint
            .submit(CallbackUnit::new("ping".to_string(), |_ctx, s: String| {
                s.len()
            }))
            .unwrap();
        assert_eq!(len, 4);

        let snapshot = bridge.shutdown();
        assert_eq!(snapshot.submitted, 1);
        assert_eq!(snapshot.completed, 1);
    }

    #[test]
    fn test_fault_is_reported_to_driver() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), inline_host()).unwrap();
        let endpoint = bridge.endpoint();

        let result = endpoint.submit(CallbackUnit::new((), |_ctx, ()| -> u8 {
            panic!("handler blew up")
        }));
        assert!(matches!(result, Err(Error::Fault(ref msg)) if msg == "handler blew up"));

        // The bridge keeps serving after a fault
        assert_eq!(
            endpoint
                .submit(CallbackUnit::new(2u8, |_ctx, v: u8| v * 2))
                .unwrap(),
            4
        );
        assert_eq!(bridge.shutdown().faulted, 1);
    }

    #[test]
    fn test_discarded_task_is_abandoned() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), DiscardingHost).unwrap();
        let result = bridge
            .endpoint()
            .submit(CallbackUnit::new(1u32, |_ctx, v: u32| v));
        assert!(matches!(result, Err(Error::Abandoned)));
        assert_eq!(bridge.metrics().abandoned, 1);
    }

    #[test]
    fn test_handoff_timeout() {
        let config = BridgeConfig {
            handoff_timeout_ms: Some(30),
            ..BridgeConfig::default()
        };
        let host = StallingHost {
            held: Mutex::new(Vec::new()),
        };
        let bridge = CallbackBridge::start(&config, host).unwrap();

        let result = bridge
            .endpoint()
            .submit(CallbackUnit::new(1u32, |_ctx, v: u32| v));
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(bridge.metrics().timed_out, 1);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), inline_host()).unwrap();
        let endpoint = bridge.endpoint();
        bridge.shutdown();

        let result = endpoint.submit(CallbackUnit::new(1u32, |_ctx, v: u32| v));
        assert!(matches!(result, Err(Error::ShutDown)));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = BridgeConfig {
            dispatcher_thread_name: "  ".to_string(),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            CallbackBridge::start(&config, DiscardingHost),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_channel_answers_false() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), inline_host()).unwrap();
        let event = ChannelEvent::new(
            protocol::ChannelId(7),
            protocol::EventId::RxBroadcast,
            vec![0u8; 8],
        )
        .unwrap();

        assert!(!bridge.endpoint().on_channel_event(event));
        assert_eq!(bridge.metrics().routing_errors, 1);
    }

    #[test]
    fn test_oversized_event_is_not_a_routing_error() {
        let bridge = CallbackBridge::start(&BridgeConfig::default(), inline_host()).unwrap();
        let endpoint = bridge.endpoint();
        endpoint
            .submit(CallbackUnit::new((), |ctx, ()| {
                ctx.channels().register(
                    protocol::ChannelId(2),
                    crate::handlers::channel_handler(|_channel, _event, _data| true),
                );
            }))
            .unwrap();

        let event = ChannelEvent {
            channel: protocol::ChannelId(2),
            event: protocol::EventId::RxBroadcast,
            payload: vec![0u8; 60].into(),
        };
        assert!(!endpoint.on_channel_event(event));

        let snapshot = bridge.shutdown();
        assert_eq!(snapshot.routing_errors, 0);
        assert_eq!(snapshot.completed, 2);
    }
}
