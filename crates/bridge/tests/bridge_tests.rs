//! Callback Bridge Integration Tests
//!
//! Drives the bridge end to end: driver threads on one side, a tokio
//! `LocalSet` host domain on the other.
//!
//! # Test Scenarios
//! - Channel event routing through the registry
//! - Concurrent driver threads without cross-talk
//! - Serialized execution inside the host domain
//! - Fault reporting to both sides
//! - Shutdown, drain and rejection
//! - Payload integrity up to the maximum message size
//!
//! Run with: `cargo test -p bridge --test bridge_tests`

use bridge::test_utils::{
    create_channel_event, create_mock_payload, create_response_event, run_with_host,
    run_with_host_timeout,
};
use bridge::{
    BridgeConfig, CallbackBridge, CallbackUnit, DispatcherState, Error, ExecutionTask,
    HostDomain, HostHandle, channel_handler, response_handler,
};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use protocol::{ChannelEvent, ChannelId, EventId, MAX_MESSAGE_SIZE, MessageId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Deadline for scenarios that must complete promptly
const HANDOFF_BOUND: Duration = Duration::from_secs(2);

fn start(host: HostHandle) -> CallbackBridge {
    CallbackBridge::start(&BridgeConfig::default(), host).expect("bridge should start")
}

// ============================================================================
// Event Routing Tests
// ============================================================================

#[test]
fn test_ping_reaches_handler() {
    let (handled, report) = run_with_host_timeout(
        HANDOFF_BOUND,
        |_runtime| {},
        |host| {
            let bridge = start(host);
            bridge
                .endpoint()
                .submit(CallbackUnit::new("ping".to_string(), |_ctx, msg: String| {
                    msg == "ping"
                }))
                .expect("callback should complete")
        },
    )
    .unwrap();

    assert!(handled);
    assert_eq!(report.executed, 1);
    assert_eq!(report.faults, 0);
}

#[test]
fn test_registered_channel_receives_event() {
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (answers, _report) = run_with_host(
        |runtime| {
            let sink = Rc::clone(&seen);
            runtime.context().channels().register(
                ChannelId(3),
                channel_handler(move |channel, event, data| {
                    sink.borrow_mut().push((channel, event, data.to_vec()));
                    true
                }),
            );
        },
        |host| {
            let bridge = start(host);
            let endpoint = bridge.endpoint();
            let known = endpoint.on_channel_event(create_channel_event(3, EventId::RxBroadcast, 8));
            let unknown =
                endpoint.on_channel_event(create_channel_event(7, EventId::RxBroadcast, 8));
            let snapshot = bridge.shutdown();
            (known, unknown, snapshot.routing_errors)
        },
    )
    .unwrap();

    assert_eq!(answers, (true, false, 1));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, ChannelId(3));
    assert_eq!(seen[0].1, EventId::RxBroadcast);
    assert_eq!(seen[0].2, (0..8).collect::<Vec<u8>>());
}

#[test]
fn test_handler_answer_is_returned_to_driver() {
    let (answer, _report) = run_with_host(
        |runtime| {
            runtime.context().channels().register(
                ChannelId(1),
                channel_handler(|_channel, event, _data| event != EventId::RxFail),
            );
        },
        |host| {
            let bridge = start(host);
            bridge
                .endpoint()
                .on_channel_event(create_channel_event(1, EventId::RxFail, 1))
        },
    )
    .unwrap();

    assert!(!answer);
}

#[test]
fn test_response_reaches_response_handler() {
    let messages = Rc::new(RefCell::new(Vec::new()));

    let (answer, _report) = run_with_host(
        |runtime| {
            let sink = Rc::clone(&messages);
            runtime
                .context()
                .set_response_handler(response_handler(move |_channel, message, _data| {
                    sink.borrow_mut().push(message);
                    true
                }));
        },
        |host| {
            let bridge = start(host);
            bridge
                .endpoint()
                .on_response(create_response_event(0, MessageId::Capabilities))
        },
    )
    .unwrap();

    assert!(answer);
    assert_eq!(*messages.borrow(), vec![MessageId::Capabilities]);
}

#[test]
fn test_reset_clears_every_channel() {
    let (result, _report) = run_with_host(
        |runtime| {
            let ctx = runtime.context();
            for n in 0..3 {
                ctx.channels()
                    .register(ChannelId(n), channel_handler(|_c, _e, _d| true));
            }
        },
        |host| {
            let bridge = start(host);
            let endpoint = bridge.endpoint();
            let before = endpoint
                .on_channel_event(create_channel_event(2, EventId::RxAcknowledged, 4));
            let remaining = endpoint
                .submit(CallbackUnit::new((), |ctx, ()| {
                    ctx.reset();
                    ctx.channels().len()
                }))
                .unwrap();
            let after = endpoint
                .on_channel_event(create_channel_event(2, EventId::RxAcknowledged, 4));
            (before, remaining, after)
        },
    )
    .unwrap();

    assert_eq!(result, (true, 0, false));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_drivers_get_their_own_results() {
    const DRIVERS: u32 = 8;
    const PER_DRIVER: u32 = 25;

    let (mismatches, report) = run_with_host(
        |_runtime| {},
        |host| {
            let bridge = start(host);
            let handles: Vec<_> = (0..DRIVERS)
                .map(|driver| {
                    let endpoint = bridge.endpoint();
                    thread::spawn(move || {
                        let mut mismatches = 0;
                        for i in 0..PER_DRIVER {
                            let input = driver * 1000 + i;
                            let output = endpoint
                                .submit(CallbackUnit::new(input, |_ctx, n: u32| n * 2))
                                .unwrap();
                            if output != input * 2 {
                                mismatches += 1;
                            }
                        }
                        mismatches
                    })
                })
                .collect();

            let mismatches: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
            let snapshot = bridge.shutdown();
            assert_eq!(snapshot.submitted, u64::from(DRIVERS * PER_DRIVER));
            assert_eq!(snapshot.completed, u64::from(DRIVERS * PER_DRIVER));
            mismatches
        },
    )
    .unwrap();

    assert_eq!(mismatches, 0);
    assert_eq!(report.executed, u64::from(DRIVERS * PER_DRIVER));
}

#[test]
fn test_callbacks_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let (driver_in_flight, driver_max_seen) = (Arc::clone(&in_flight), Arc::clone(&max_seen));

    run_with_host(
        |_runtime| {},
        move |host| {
            let bridge = start(host);
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let endpoint = bridge.endpoint();
                    let in_flight = Arc::clone(&driver_in_flight);
                    let max_seen = Arc::clone(&driver_max_seen);
                    thread::spawn(move || {
                        for _ in 0..10 {
                            let in_flight = Arc::clone(&in_flight);
                            let max_seen = Arc::clone(&max_seen);
                            endpoint
                                .submit(CallbackUnit::new((), move |_ctx, ()| {
                                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                    max_seen.fetch_max(now, Ordering::SeqCst);
                                    thread::sleep(Duration::from_millis(1));
                                    in_flight.fetch_sub(1, Ordering::SeqCst);
                                }))
                                .unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        },
    )
    .unwrap();

    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Fault Tests
// ============================================================================

#[test]
fn test_fault_reaches_driver_and_host_once() {
    let observed = Rc::new(Cell::new(0u32));

    let (result, report) = run_with_host_timeout(
        HANDOFF_BOUND,
        |runtime| {
            let observed = Rc::clone(&observed);
            runtime.on_fault(move |fault| {
                assert_eq!(fault.message, "handler failed");
                observed.set(observed.get() + 1);
            });
        },
        |host| {
            let bridge = start(host);
            let endpoint = bridge.endpoint();
            let failed = endpoint.submit(CallbackUnit::new((), |_ctx, ()| -> bool {
                panic!("handler failed")
            }));
            let next = endpoint.submit(CallbackUnit::new(5u8, |_ctx, n: u8| n));
            (failed, next)
        },
    )
    .unwrap();

    let (failed, next) = result;
    assert!(matches!(failed, Err(Error::Fault(ref msg)) if msg == "handler failed"));
    assert_eq!(next.unwrap(), 5);
    assert_eq!(observed.get(), 1);
    assert_eq!(report.faults, 1);
}

#[test]
fn test_faulting_channel_handler_answers_false() {
    let (answer, report) = run_with_host(
        |runtime| {
            runtime.context().channels().register(
                ChannelId(4),
                channel_handler(|_c, _e, _d| panic!("bad channel handler")),
            );
        },
        |host| {
            let bridge = start(host);
            bridge
                .endpoint()
                .on_channel_event(create_channel_event(4, EventId::RxBroadcast, 2))
        },
    )
    .unwrap();

    assert!(!answer);
    assert_eq!(report.faults, 1);
}

// ============================================================================
// Shutdown Tests
// ============================================================================

/// Blocks the first `schedule` call until the gate opens
struct GatedHost {
    inner: HostHandle,
    gate: Mutex<mpsc::Receiver<()>>,
    opened: AtomicBool,
}

impl HostDomain for GatedHost {
    fn schedule(&self, task: ExecutionTask) -> bridge::Result<()> {
        if !self.opened.swap(true, Ordering::SeqCst) {
            let _ = self.gate.lock().unwrap().recv();
        }
        self.inner.schedule(task)
    }
}

#[test]
fn test_shutdown_drains_queued_units() {
    const UNITS: u32 = 5;

    let (results, _report) = run_with_host_timeout(
        HANDOFF_BOUND,
        |_runtime| {},
        |host| {
            let (open, gate) = mpsc::channel();
            let gated = GatedHost {
                inner: host,
                gate: Mutex::new(gate),
                opened: AtomicBool::new(false),
            };
            let bridge = CallbackBridge::start(&BridgeConfig::default(), gated).unwrap();

            let drivers: Vec<_> = (0..UNITS)
                .map(|n| {
                    let endpoint = bridge.endpoint();
                    thread::spawn(move || endpoint.submit(CallbackUnit::new(n, |_ctx, n: u32| n)))
                })
                .collect();

            // One unit is stuck at the gate, the rest wait in the queue
            let deadline = Instant::now() + HANDOFF_BOUND;
            while bridge.queued() < (UNITS - 1) as usize {
                assert!(Instant::now() < deadline, "units never queued");
                thread::sleep(Duration::from_millis(1));
            }

            let stopper = thread::spawn(move || bridge.shutdown());
            thread::sleep(Duration::from_millis(20));
            open.send(()).unwrap();

            let snapshot = stopper.join().unwrap();
            assert_eq!(snapshot.rejected, 0);

            let mut results: Vec<u32> = drivers
                .into_iter()
                .map(|d| d.join().unwrap().unwrap())
                .collect();
            results.sort_unstable();
            results
        },
    )
    .unwrap();

    assert_eq!(results, (0..UNITS).collect::<Vec<_>>());
}

#[test]
fn test_submit_after_shutdown_fails_fast() {
    let (outcome, _report) = run_with_host(
        |_runtime| {},
        |host| {
            let bridge = start(host);
            let endpoint = bridge.endpoint();
            bridge.shutdown();
            endpoint.submit(CallbackUnit::new(1u8, |_ctx, n: u8| n))
        },
    )
    .unwrap();

    assert!(matches!(outcome, Err(Error::ShutDown)));
}

#[test]
fn test_idle_shutdown_is_bounded() {
    let (state_before, _report) = run_with_host(
        |_runtime| {},
        |host| {
            let bridge = start(host);
            thread::sleep(Duration::from_millis(10));
            let state = bridge.dispatcher_state();
            let started = Instant::now();
            bridge.shutdown();
            assert!(started.elapsed() < Duration::from_secs(1));
            state
        },
    )
    .unwrap();

    assert_eq!(state_before, DispatcherState::Waiting);
}

#[test]
fn test_slow_host_times_out_driver() {
    let (outcome, _report) = run_with_host(
        |_runtime| {},
        |host| {
            let config = BridgeConfig {
                handoff_timeout_ms: Some(20),
                ..BridgeConfig::default()
            };
            let bridge = CallbackBridge::start(&config, host).unwrap();
            let outcome = bridge.endpoint().submit(CallbackUnit::new((), |_ctx, ()| {
                thread::sleep(Duration::from_millis(200));
            }));
            assert_eq!(bridge.metrics().timed_out, 1);
            outcome
        },
    )
    .unwrap();

    assert!(matches!(outcome, Err(Error::Timeout(_))));
}

// ============================================================================
// Payload Integrity
// ============================================================================

thread_local! {
    static LAST_SEEN: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

#[test]
fn test_payloads_survive_the_bridge() {
    let (_, _report) = run_with_host(
        |runtime| {
            runtime.context().channels().register(
                ChannelId(9),
                channel_handler(|_c, _e, data| {
                    LAST_SEEN.with(|seen| *seen.borrow_mut() = data.to_vec());
                    true
                }),
            );
        },
        |host| {
            let bridge = start(host);
            let endpoint = bridge.endpoint();
            let round_trip = |payload: Vec<u8>| {
                let event = ChannelEvent::new(ChannelId(9), EventId::RxBroadcast, payload).unwrap();
                endpoint
                    .submit(CallbackUnit::new(event, |ctx, event: ChannelEvent| {
                        let handled = ctx.channels().dispatch(&event).unwrap();
                        (handled, LAST_SEEN.with(|seen| seen.borrow().clone()))
                    }))
                    .unwrap()
            };

            // Both ends of the size range, every run
            for size in [0, MAX_MESSAGE_SIZE] {
                let payload = create_mock_payload(size);
                let (handled, seen) = round_trip(payload.clone());
                assert!(handled);
                assert_eq!(seen, payload);
            }

            let mut runner = TestRunner::new(Config::with_cases(64));
            runner
                .run(&vec(any::<u8>(), 0..=MAX_MESSAGE_SIZE), |payload| {
                    let (handled, seen) = round_trip(payload.clone());
                    prop_assert!(handled);
                    prop_assert_eq!(seen, payload);
                    Ok(())
                })
                .unwrap();
        },
    )
    .unwrap();
}
