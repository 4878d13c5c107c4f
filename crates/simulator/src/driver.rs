//! Simulated driver threads
//!
//! Each thread stands in for a native driver callback thread: it fires
//! channel events at the bridge and blocks on every one until the host
//! domain has answered.

use crate::config::DriverSettings;
use anyhow::{Context, Result, anyhow};
use bridge::{CallbackUnit, DriverEndpoint, Error};
use bytes::Bytes;
use protocol::{
    CHANNEL_NUMBER_MASK, ChannelEvent, ChannelId, EventId, MAX_CHANNELS, MAX_MESSAGE_SIZE,
    MessageId, ResponseEvent,
};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Event kinds a simulated driver emits
const EVENT_MIX: [EventId; 7] = [
    EventId::RxBroadcast,
    EventId::RxBroadcast,
    EventId::RxAcknowledged,
    EventId::RxBurstPacket,
    EventId::Tx,
    EventId::RxFail,
    EventId::RxSearchTimeout,
];

#[derive(Debug, Default)]
struct Counters {
    sequence: AtomicU64,
    handled: AtomicU64,
    unhandled: AtomicU64,
    faults: AtomicU64,
    rejected: AtomicU64,
}

/// Totals across every driver thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverSummary {
    /// Events a handler answered `true` to
    pub handled: u64,
    /// Events answered `false` (unknown channel, handler refusal, fault)
    pub unhandled: u64,
    /// Faulting callbacks reported back to the driver
    pub faults: u64,
    /// Submissions refused because the bridge was shut down
    pub rejected: u64,
}

/// Run the configured driver threads to completion
///
/// `open` lists the channel numbers open in the host domain; events for other
/// channels exercise the unknown-channel path.
pub fn run_drivers(
    endpoint: &DriverEndpoint,
    settings: &DriverSettings,
    open: &[u8],
) -> Result<DriverSummary> {
    let counters = Arc::new(Counters::default());
    let open: Arc<[u8]> = open.into();
    let closed: Arc<[u8]> = (0..MAX_CHANNELS).filter(|c| !open.contains(c)).collect();

    info!(
        "Starting {} driver thread(s), {} events each",
        settings.threads, settings.events_per_thread
    );

    let handles = (0..settings.threads)
        .map(|n| {
            let driver = Driver {
                index: n,
                endpoint: endpoint.clone(),
                settings: settings.clone(),
                open: Arc::clone(&open),
                closed: Arc::clone(&closed),
                counters: Arc::clone(&counters),
            };
            thread::Builder::new()
                .name(format!("ant-driver-{}", n))
                .spawn(move || driver.run())
                .with_context(|| format!("Failed to spawn driver thread {}", n))
        })
        .collect::<Result<Vec<_>>>()?;

    for (n, handle) in handles.into_iter().enumerate() {
        handle
            .join()
            .map_err(|_| anyhow!("Driver thread {} panicked", n))?;
    }

    Ok(DriverSummary {
        handled: counters.handled.load(Ordering::Relaxed),
        unhandled: counters.unhandled.load(Ordering::Relaxed),
        faults: counters.faults.load(Ordering::Relaxed),
        rejected: counters.rejected.load(Ordering::Relaxed),
    })
}

struct Driver {
    index: usize,
    endpoint: DriverEndpoint,
    settings: DriverSettings,
    open: Arc<[u8]>,
    closed: Arc<[u8]>,
    counters: Arc<Counters>,
}

impl Driver {
    fn run(self) {
        let mut rng = rand::rng();
        let total = self.settings.events_per_thread;
        debug!("Driver {} started", self.index);

        for i in 0..total {
            if self.index == 0 && i == total / 2 {
                self.system_reset();
            }

            let sequence = self.counters.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let fault_every = self.settings.fault_every;
            if fault_every > 0 && sequence % fault_every == 0 {
                self.fire_fault(sequence);
            } else {
                let event = self.random_event(&mut rng);
                let counter = if self.endpoint.on_channel_event(event) {
                    &self.counters.handled
                } else {
                    &self.counters.unhandled
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }

            if self.settings.event_interval_ms > 0 {
                thread::sleep(Duration::from_millis(self.settings.event_interval_ms));
            }
        }

        debug!("Driver {} finished", self.index);
    }

    fn system_reset(&self) {
        info!("Driver {} reporting SYSTEM_RESET", self.index);
        let response = ResponseEvent {
            channel: ChannelId(0),
            message: MessageId::SystemReset,
            payload: Bytes::new(),
        };
        if !self.endpoint.on_response(response) {
            warn!("SYSTEM_RESET response was not handled");
        }
    }

    fn fire_fault(&self, sequence: u64) {
        let unit = CallbackUnit::new(sequence, |_ctx, sequence: u64| -> bool {
            panic!("simulated fault in callback {}", sequence)
        });

        match self.endpoint.submit(unit) {
            Err(Error::Fault(message)) => {
                debug!("Driver {} saw fault: {}", self.index, message);
                self.counters.faults.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::ShutDown) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Driver {} fault callback failed: {}", self.index, e),
            Ok(_) => warn!("Driver {} fault callback returned normally", self.index),
        }
    }

    fn random_event(&self, rng: &mut impl Rng) -> ChannelEvent {
        let use_closed = !self.closed.is_empty()
            && (self.open.is_empty() || rng.random_bool(self.settings.unknown_channel_ratio));
        let pool = if use_closed { &self.closed } else { &self.open };
        let channel = pool[rng.random_range(0..pool.len())];
        let event = EVENT_MIX[rng.random_range(0..EVENT_MIX.len())];

        ChannelEvent {
            channel: ChannelId(channel),
            event,
            payload: random_payload(rng, channel, event),
        }
    }
}

fn random_payload(rng: &mut impl Rng, channel: u8, event: EventId) -> Bytes {
    if !event.is_data() {
        return Bytes::from(vec![u8::from(event)]);
    }

    let len = rng.random_range(1..=MAX_MESSAGE_SIZE);
    let mut payload = vec![0u8; len];
    rng.fill(&mut payload[..]);
    if event.is_burst() {
        let sequence: u8 = rng.random_range(0..8);
        payload[0] = (sequence << 5) | (channel & CHANNEL_NUMBER_MASK);
    }
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{burst_channel, burst_sequence};

    #[test]
    fn test_random_payload_sizes() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let payload = random_payload(&mut rng, 3, EventId::RxBroadcast);
            assert!(!payload.is_empty());
            assert!(payload.len() <= MAX_MESSAGE_SIZE);
        }
    }

    #[test]
    fn test_burst_payload_header() {
        let mut rng = rand::rng();
        let payload = random_payload(&mut rng, 5, EventId::RxBurstPacket);
        assert_eq!(burst_channel(payload[0]), 5);
        assert!(burst_sequence(payload[0]) < 8);
    }

    #[test]
    fn test_status_payload_carries_event_code() {
        let mut rng = rand::rng();
        let payload = random_payload(&mut rng, 0, EventId::RxFail);
        assert_eq!(payload.as_ref(), &[0x02]);
    }
}
