//! Channel registry
//!
//! Routing table from channel number to the handler that owns the channel,
//! plus that channel's event buffer. Mutated and read only from the host
//! domain, so it relies on `RefCell` rather than a lock.
//!
//! Entries are added when a channel is assigned and removed when it is
//! explicitly closed. A device reset or connection close clears the whole
//! table, since the driver invalidates every channel at that point whether
//! or not each one was closed.

use crate::error::{Error, Result};
use crate::handlers::ChannelHandler;
use protocol::{ChannelEvent, ChannelId, MAX_MESSAGE_SIZE, ProtocolError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

struct ChannelEntry {
    handler: Rc<dyn ChannelHandler>,
    /// Event data staging area, zeroed after every event
    buffer: RefCell<[u8; MAX_MESSAGE_SIZE]>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    entries: RefCell<HashMap<ChannelId, Rc<ChannelEntry>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `channel`, returning the handler it replaced
    pub fn register(
        &self,
        channel: ChannelId,
        handler: Rc<dyn ChannelHandler>,
    ) -> Option<Rc<dyn ChannelHandler>> {
        let entry = Rc::new(ChannelEntry {
            handler,
            buffer: RefCell::new([0; MAX_MESSAGE_SIZE]),
        });
        debug!("Registered handler for channel {}", channel);
        self.entries
            .borrow_mut()
            .insert(channel, entry)
            .map(|old| Rc::clone(&old.handler))
    }

    /// Handler currently responsible for `channel`
    pub fn lookup(&self, channel: ChannelId) -> Result<Rc<dyn ChannelHandler>> {
        self.entry(channel).map(|entry| Rc::clone(&entry.handler))
    }

    /// Remove `channel` after it was explicitly closed
    pub fn unregister(&self, channel: ChannelId) -> Option<Rc<dyn ChannelHandler>> {
        let removed = self.entries.borrow_mut().remove(&channel);
        if removed.is_some() {
            debug!("Unregistered channel {}", channel);
        }
        removed.map(|entry| Rc::clone(&entry.handler))
    }

    /// Drop every channel; returns how many were registered
    pub fn clear_all(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        let count = entries.len();
        entries.clear();
        count
    }

    /// True while `channel` has a registered handler
    pub fn is_open(&self, channel: ChannelId) -> bool {
        self.entries.borrow().contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Registered channel numbers in ascending order
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self.entries.borrow().keys().copied().collect();
        channels.sort();
        channels
    }

    /// Route a decoded event to its channel handler
    ///
    /// The payload is staged in the channel's buffer and the handler gets a
    /// copy of the staged bytes, so no borrow is held while it runs and it
    /// may dispatch on its own channel again. Returns the handler's answer
    /// for the driver.
    pub fn dispatch(&self, event: &ChannelEvent) -> Result<bool> {
        let entry = self.entry(event.channel)?;
        let len = event.payload.len();
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let mut staged = [0u8; MAX_MESSAGE_SIZE];
        {
            let mut buffer = entry.buffer.borrow_mut();
            buffer[..len].copy_from_slice(&event.payload);
            staged[..len].copy_from_slice(&buffer[..len]);
        }
        let handled = entry
            .handler
            .on_event(event.channel, event.event, &staged[..len]);
        entry.buffer.borrow_mut().fill(0);
        Ok(handled)
    }

    // The entry is cloned out so handlers may register or unregister
    // channels while they run.
    fn entry(&self, channel: ChannelId) -> Result<Rc<ChannelEntry>> {
        self.entries
            .borrow()
            .get(&channel)
            .cloned()
            .ok_or(Error::UnknownChannel(channel))
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::channel_handler;
    use protocol::EventId;
    use std::cell::RefCell;

    fn recording() -> (Rc<dyn ChannelHandler>, Rc<RefCell<Vec<(ChannelId, EventId, Vec<u8>)>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler = channel_handler(move |channel, event, data| {
            sink.borrow_mut().push((channel, event, data.to_vec()));
            true
        });
        (handler, seen)
    }

    #[test]
    fn test_register_and_dispatch() {
        let registry = ChannelRegistry::new();
        let (handler, seen) = recording();
        registry.register(ChannelId(3), handler);

        let event = ChannelEvent::new(ChannelId(3), EventId::RxBroadcast, &b"ping"[..]).unwrap();
        assert!(registry.dispatch(&event).unwrap());
        assert_eq!(
            *seen.borrow(),
            vec![(ChannelId(3), EventId::RxBroadcast, b"ping".to_vec())]
        );
    }

    #[test]
    fn test_unknown_channel_is_routing_error() {
        let registry = ChannelRegistry::new();
        let (handler, seen) = recording();
        registry.register(ChannelId(3), handler);

        let event = ChannelEvent::new(ChannelId(7), EventId::RxBroadcast, vec![1]).unwrap();
        assert!(matches!(
            registry.dispatch(&event),
            Err(Error::UnknownChannel(ChannelId(7)))
        ));
        assert!(seen.borrow().is_empty());
        assert!(registry.lookup(ChannelId(7)).is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = ChannelRegistry::new();
        let (handler, _) = recording();
        registry.register(ChannelId(1), handler);
        assert!(registry.is_open(ChannelId(1)));

        assert!(registry.unregister(ChannelId(1)).is_some());
        assert!(!registry.is_open(ChannelId(1)));
        assert!(registry.unregister(ChannelId(1)).is_none());
    }

    #[test]
    fn test_clear_all_invalidates_every_channel() {
        let registry = ChannelRegistry::new();
        for n in [0u8, 3, 5] {
            let (handler, _) = recording();
            registry.register(ChannelId(n), handler);
        }
        assert_eq!(registry.channels(), vec![ChannelId(0), ChannelId(3), ChannelId(5)]);

        assert_eq!(registry.clear_all(), 3);
        for n in [0u8, 3, 5] {
            assert!(registry.lookup(ChannelId(n)).is_err());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_overwrites() {
        let registry = ChannelRegistry::new();
        let (first, first_seen) = recording();
        let (second, second_seen) = recording();
        assert!(registry.register(ChannelId(2), first).is_none());
        assert!(registry.register(ChannelId(2), second).is_some());
        assert_eq!(registry.len(), 1);

        let event = ChannelEvent::new(ChannelId(2), EventId::Tx, Vec::new()).unwrap();
        registry.dispatch(&event).unwrap();
        assert!(first_seen.borrow().is_empty());
        assert_eq!(second_seen.borrow().len(), 1);
    }

    #[test]
    fn test_buffer_is_zeroed_between_events() {
        let registry = ChannelRegistry::new();
        let (handler, seen) = recording();
        registry.register(ChannelId(1), handler);

        let long = ChannelEvent::new(ChannelId(1), EventId::RxBroadcast, vec![0xFF; 8]).unwrap();
        let short = ChannelEvent::new(ChannelId(1), EventId::RxBroadcast, vec![0x01]).unwrap();
        registry.dispatch(&long).unwrap();
        registry.dispatch(&short).unwrap();

        assert_eq!(seen.borrow()[1].2, vec![0x01]);
        let entry = registry.entry(ChannelId(1)).unwrap();
        assert!(entry.buffer.borrow().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_handler_may_unregister_its_own_channel() {
        let registry = Rc::new(ChannelRegistry::new());
        let weak = Rc::downgrade(&registry);
        registry.register(
            ChannelId(6),
            channel_handler(move |channel, event, _data| {
                if event == EventId::ChannelClosed {
                    if let Some(registry) = weak.upgrade() {
                        registry.unregister(channel);
                    }
                }
                true
            }),
        );

        let closed = ChannelEvent::new(ChannelId(6), EventId::ChannelClosed, Vec::new()).unwrap();
        assert!(registry.dispatch(&closed).unwrap());
        assert!(!registry.is_open(ChannelId(6)));
    }

    #[test]
    fn test_handler_may_dispatch_on_its_own_channel() {
        let registry = Rc::new(ChannelRegistry::new());
        let weak = Rc::downgrade(&registry);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        registry.register(
            ChannelId(4),
            channel_handler(move |channel, event, data| {
                sink.borrow_mut().push(data.to_vec());
                if event == EventId::RxBroadcast {
                    let follow_up = ChannelEvent::new(channel, EventId::Tx, vec![7]).unwrap();
                    let registry = weak.upgrade().unwrap();
                    assert!(registry.dispatch(&follow_up).unwrap());
                    // Outer data is untouched by the nested event
                    assert_eq!(data, [1, 2, 3]);
                }
                true
            }),
        );

        let event = ChannelEvent::new(ChannelId(4), EventId::RxBroadcast, vec![1, 2, 3]).unwrap();
        assert!(registry.dispatch(&event).unwrap());
        assert_eq!(*seen.borrow(), vec![vec![1, 2, 3], vec![7]]);
        let entry = registry.entry(ChannelId(4)).unwrap();
        assert!(entry.buffer.borrow().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let registry = ChannelRegistry::new();
        let (handler, seen) = recording();
        registry.register(ChannelId(1), handler);

        let event = ChannelEvent {
            channel: ChannelId(1),
            event: EventId::RxBroadcast,
            payload: vec![0; MAX_MESSAGE_SIZE + 1].into(),
        };
        assert!(matches!(registry.dispatch(&event), Err(Error::Protocol(_))));
        assert!(seen.borrow().is_empty());
    }
}
