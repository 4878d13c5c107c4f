//! Test utilities for the callback bridge
//!
//! Provides mock events and a host harness for testing across crates.
//!
//! # Example
//!
//! ```
//! use bridge::test_utils::create_channel_event;
//! use protocol::{ChannelId, EventId};
//!
//! # fn main() {
//! let event = create_channel_event(3, EventId::RxBroadcast, 8);
//! assert_eq!(event.channel, ChannelId(3));
//! assert_eq!(event.payload.len(), 8);
//! # }
//! ```

use crate::error::{Error, Result};
use crate::host::{HostHandle, HostReport, HostRuntime, local_host};
use protocol::{ChannelEvent, ChannelId, EventId, MAX_MESSAGE_SIZE, MessageId, ResponseEvent};
use std::future::Future;
use std::time::Duration;

/// Deadline for one host-harness run
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a payload of `size` bytes with a recognizable pattern
///
/// Sizes above [`MAX_MESSAGE_SIZE`] are allowed so tests can build oversize
/// payloads on purpose.
pub fn create_mock_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Create a channel event carrying a mock payload
///
/// # Panics
/// If `size` exceeds [`MAX_MESSAGE_SIZE`].
pub fn create_channel_event(channel: u8, event: EventId, size: usize) -> ChannelEvent {
    assert!(size <= MAX_MESSAGE_SIZE, "mock payload too large: {}", size);
    ChannelEvent {
        channel: ChannelId(channel),
        event,
        payload: create_mock_payload(size).into(),
    }
}

/// Create a burst packet event with the sequence number in the top three bits
///
/// ```
/// use bridge::test_utils::create_burst_event;
/// use protocol::burst_sequence;
///
/// let event = create_burst_event(1, 5, &[0xAA, 0xBB]);
/// assert_eq!(burst_sequence(event.payload[0]), 5);
/// ```
pub fn create_burst_event(channel: u8, sequence: u8, data: &[u8]) -> ChannelEvent {
    let mut payload = Vec::with_capacity(data.len() + 1);
    payload.push((sequence << 5) | (channel & protocol::CHANNEL_NUMBER_MASK));
    payload.extend_from_slice(data);
    ChannelEvent {
        channel: ChannelId(channel),
        event: EventId::RxBurstPacket,
        payload: payload.into(),
    }
}

/// Create an empty response event
pub fn create_response_event(channel: u8, message: MessageId) -> ResponseEvent {
    ResponseEvent {
        channel: ChannelId(channel),
        message,
        payload: Default::default(),
    }
}

/// Run a test against a live host domain
///
/// The current thread becomes the host thread: it runs a current-thread tokio
/// runtime with a `LocalSet` and the [`HostRuntime`]. `setup` runs first on
/// that thread (register channels, install a fault hook). `driver` then runs
/// on a blocking thread with the [`HostHandle`], standing in for the driver
/// side. The runtime stops once every handle is dropped.
///
/// The whole run is bounded by [`DEFAULT_TEST_TIMEOUT`]; see
/// [`run_with_host_timeout`]. A panic inside `driver` is propagated to the
/// caller.
///
/// # Example
/// ```
/// use bridge::test_utils::run_with_host;
/// use bridge::{BridgeConfig, CallbackBridge, CallbackUnit};
///
/// let (value, report) = run_with_host(
///     |_runtime| {},
///     |host| {
///         let bridge = CallbackBridge::start(&BridgeConfig::default(), host).unwrap();
///         bridge
///             .endpoint()
///             .submit(CallbackUnit::new(20u32, |_ctx, n: u32| n + 1))
///             .unwrap()
///     },
/// )
/// .unwrap();
/// assert_eq!(value, 21);
/// assert_eq!(report.executed, 1);
/// ```
pub fn run_with_host<S, D, T>(setup: S, driver: D) -> Result<(T, HostReport)>
where
    S: FnOnce(&mut HostRuntime),
    D: FnOnce(HostHandle) -> T + Send + 'static,
    T: Send + 'static,
{
    run_with_host_timeout(DEFAULT_TEST_TIMEOUT, setup, driver)
}

/// [`run_with_host`] with an explicit deadline
///
/// If the driver and the host have not both finished within `limit`, the
/// run fails with [`Error::Timeout`] instead of hanging. The stuck driver
/// thread is left behind.
pub fn run_with_host_timeout<S, D, T>(
    limit: Duration,
    setup: S,
    driver: D,
) -> Result<(T, HostReport)>
where
    S: FnOnce(&mut HostRuntime),
    D: FnOnce(HostHandle) -> T + Send + 'static,
    T: Send + 'static,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    let (handle, mut runtime) = local_host();
    setup(&mut runtime);

    let outcome = local.block_on(&rt, async move {
        with_timeout(limit, async move {
            let host = tokio::task::spawn_local(runtime.run());
            let value = match tokio::task::spawn_blocking(move || driver(handle)).await {
                Ok(value) => value,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => return Err(Error::HostUnavailable(e.to_string())),
            };
            let report = host
                .await
                .map_err(|e| Error::HostUnavailable(e.to_string()))?;
            Ok::<_, Error>((value, report))
        })
        .await
    });

    drop(local);
    // Dropping the runtime would wait for a stuck driver forever
    rt.shutdown_background();
    outcome.map_err(|e| Error::Timeout(e.duration))?
}

/// Await `future`, giving up after `duration`
///
/// # Example
/// ```
/// use bridge::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # async fn example() {
/// let answer = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(answer.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(
    duration: Duration,
    future: F,
) -> std::result::Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// A bounded test step ran out of time
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test step did not finish within {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
