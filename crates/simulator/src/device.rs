//! Host-side device state
//!
//! Everything here lives in the host domain: the channel handlers opened
//! from the configuration and the response handler that reacts to a device
//! reset by clearing the registry and reopening the channels.

use crate::config::{ChannelSettings, HandlerKind};
use bridge::{
    ChannelHandler, HostContext, LoggingEventHandler, LoggingResponseHandler, ResponseHandler,
    channel_handler, response_handler,
};
use protocol::{ChannelId, MessageId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info};

/// Per-run bookkeeping shared by the host-side handlers
#[derive(Debug, Default)]
pub struct DeviceState {
    channels: Vec<ChannelSettings>,
    delivered: RefCell<BTreeMap<ChannelId, u64>>,
    resets: Cell<u32>,
    faults: Cell<u64>,
}

impl DeviceState {
    pub fn new(channels: Vec<ChannelSettings>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    fn record(&self, channel: ChannelId) {
        *self.delivered.borrow_mut().entry(channel).or_insert(0) += 1;
    }

    pub fn record_fault(&self) {
        self.faults.set(self.faults.get() + 1);
    }

    /// Events delivered to each channel handler
    pub fn delivered(&self) -> BTreeMap<ChannelId, u64> {
        self.delivered.borrow().clone()
    }

    pub fn resets(&self) -> u32 {
        self.resets.get()
    }

    /// Faults observed by the host domain's fault hook
    pub fn faults(&self) -> u64 {
        self.faults.get()
    }
}

fn handler_for(settings: ChannelSettings, state: &Rc<DeviceState>) -> Rc<dyn ChannelHandler> {
    let state = Rc::clone(state);
    channel_handler(move |channel, event, data| {
        state.record(channel);
        match settings.handler {
            HandlerKind::Logging => LoggingEventHandler.on_event(channel, event, data),
            HandlerKind::Counting => true,
        }
    })
}

/// Register a handler for every configured channel
pub fn open_channels(ctx: &HostContext, state: &Rc<DeviceState>) {
    for settings in &state.channels {
        ctx.channels()
            .register(settings.id(), handler_for(*settings, state));
        debug!(
            "Opened channel {} ({:?} handler)",
            settings.number, settings.handler
        );
    }
    info!("{} channel(s) open", ctx.channels().len());
}

/// Install the device-wide response handler
///
/// A SYSTEM_RESET response clears the registry and reopens the configured
/// channels; everything else goes to the logging handler.
pub fn install_response_handler(ctx: &Rc<HostContext>, state: &Rc<DeviceState>) {
    let weak = Rc::downgrade(ctx);
    let state = Rc::clone(state);

    ctx.set_response_handler(response_handler(move |channel, message, data| {
        if message != MessageId::SystemReset {
            return LoggingResponseHandler.on_response(channel, message, data);
        }
        let Some(ctx) = weak.upgrade() else {
            return false;
        };
        state.resets.set(state.resets.get() + 1);
        ctx.reset();
        open_channels(&ctx, &state);
        true
    }));
}
