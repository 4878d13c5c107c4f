//! Channel and response handlers
//!
//! Handlers run inside the host domain. Their boolean result is what the
//! driver receives back from its native callback.

use protocol::{ChannelId, EventId, MessageId, ResetReason, burst_channel, burst_sequence};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// Receives events for one registered channel
pub trait ChannelHandler {
    fn on_event(&self, channel: ChannelId, event: EventId, data: &[u8]) -> bool;
}

impl<F> ChannelHandler for F
where
    F: Fn(ChannelId, EventId, &[u8]) -> bool,
{
    fn on_event(&self, channel: ChannelId, event: EventId, data: &[u8]) -> bool {
        self(channel, event, data)
    }
}

/// Receives device-wide command responses
pub trait ResponseHandler {
    fn on_response(&self, channel: ChannelId, message: MessageId, data: &[u8]) -> bool;
}

impl<F> ResponseHandler for F
where
    F: Fn(ChannelId, MessageId, &[u8]) -> bool,
{
    fn on_response(&self, channel: ChannelId, message: MessageId, data: &[u8]) -> bool {
        self(channel, message, data)
    }
}

/// Wrap a closure as a shared channel handler
pub fn channel_handler<F>(f: F) -> Rc<dyn ChannelHandler>
where
    F: Fn(ChannelId, EventId, &[u8]) -> bool + 'static,
{
    Rc::new(f)
}

/// Wrap a closure as a shared response handler
pub fn response_handler<F>(f: F) -> Rc<dyn ResponseHandler>
where
    F: Fn(ChannelId, MessageId, &[u8]) -> bool + 'static,
{
    Rc::new(f)
}

/// Logs every channel event by kind
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

impl ChannelHandler for LoggingEventHandler {
    fn on_event(&self, channel: ChannelId, event: EventId, data: &[u8]) -> bool {
        match event {
            EventId::Tx => info!("Broadcast message on channel {} was transmitted", channel),
            EventId::RxSearchTimeout => warn!("Search timeout on channel {}", channel),
            EventId::RxFail | EventId::TransferRxFailed => {
                warn!("Receive failed on channel {}", channel)
            }
            EventId::TransferTxCompleted => info!("Transfer completed on channel {}", channel),
            EventId::TransferTxFailed => warn!("Transfer failed on channel {}", channel),
            EventId::TransferTxStart => info!("Burst transfer started on channel {}", channel),
            EventId::ChannelClosed => warn!("Channel {} was closed", channel),
            EventId::RxFailGoToSearch => warn!("Channel {} dropped; resume search", channel),
            EventId::ChannelCollision => warn!("Channel collision on channel {}", channel),
            burst if burst.is_burst() => match data.split_first() {
                Some((first, rest)) => info!(
                    "Burst on channel {} (packet channel {}): seq {} {:02x?}",
                    channel,
                    burst_channel(*first),
                    burst_sequence(*first),
                    &rest[..rest.len().min(8)]
                ),
                None => warn!("Empty burst packet on channel {}", channel),
            },
            EventId::RxBroadcast => info!(
                "Broadcast on channel {}: {:02x?}",
                channel,
                &data[..data.len().min(8)]
            ),
            other => debug!(
                "Event on channel {}: {}: {:02x?}",
                channel,
                other,
                &data[..data.len().min(4)]
            ),
        }
        true
    }
}

/// What the default response handler read out of one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSummary {
    /// Firmware version string
    Version(String),
    /// The device finished a reset
    Startup(ResetReason),
    /// Status reply to a command; code 0 means success
    Status { message: MessageId, code: u8 },
    /// Nothing to decode beyond the message id
    Other(MessageId),
}

/// Default device-wide response handler: decode, log and accept
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResponseHandler;

impl LoggingResponseHandler {
    /// Decode a response the way it is logged
    ///
    /// `RESPONSE_EVENT` wraps the reply to another command; its second byte
    /// names that command and the third carries the status code.
    pub fn summarize(message: MessageId, data: &[u8]) -> ResponseSummary {
        match message {
            MessageId::ResponseEvent => match data.get(1).copied().map(MessageId::from) {
                Some(MessageId::ResponseEvent) | None => ResponseSummary::Other(message),
                Some(inner) => Self::summarize(inner, data),
            },
            MessageId::Version => {
                let text = data.split(|b| *b == 0).next().unwrap_or_default();
                ResponseSummary::Version(String::from_utf8_lossy(text).into_owned())
            }
            MessageId::StartupMesg => match data.first() {
                Some(byte) => ResponseSummary::Startup(ResetReason::from_startup_byte(*byte)),
                None => ResponseSummary::Other(message),
            },
            MessageId::Unknown(_) => ResponseSummary::Other(message),
            _ => match data.get(2) {
                Some(code) => ResponseSummary::Status {
                    message,
                    code: *code,
                },
                None => ResponseSummary::Other(message),
            },
        }
    }
}

impl ResponseHandler for LoggingResponseHandler {
    fn on_response(&self, channel: ChannelId, message: MessageId, data: &[u8]) -> bool {
        match Self::summarize(message, data) {
            ResponseSummary::Version(version) => info!("ANT version {}", version),
            ResponseSummary::Startup(reason) => info!("Reset complete: {}", reason),
            ResponseSummary::Status { message, code: 0 } => {
                info!("Channel {}: {} succeeded", channel, message)
            }
            ResponseSummary::Status { message, code } => {
                error!("Channel {}: {} failed with status {:#04x}", channel, message, code)
            }
            ResponseSummary::Other(message) => debug!(
                "Response for channel {}: {}: {:02x?}",
                channel,
                message,
                &data[..data.len().min(4)]
            ),
        }
        true
    }
}
