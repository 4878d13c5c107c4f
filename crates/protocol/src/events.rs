//! Decoded events handed from the driver layer to the bridge

use crate::error::{ProtocolError, Result};
use crate::types::{ChannelId, EventId, MAX_MESSAGE_SIZE, MessageId};
use bytes::Bytes;

fn check_payload(payload: &Bytes) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Event reported on a single channel
///
/// Routed through the channel registry to the handler that owns `channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub event: EventId,
    pub payload: Bytes,
}

impl ChannelEvent {
    /// Build a channel event, rejecting oversized payloads
    pub fn new(channel: ChannelId, event: EventId, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        check_payload(&payload)?;
        Ok(Self {
            channel,
            event,
            payload,
        })
    }
}

/// Response to a command, delivered to the device-wide response callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    pub channel: ChannelId,
    pub message: MessageId,
    pub payload: Bytes,
}

impl ResponseEvent {
    /// Build a response event, rejecting oversized payloads
    pub fn new(channel: ChannelId, message: MessageId, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        check_payload(&payload)?;
        Ok(Self {
            channel,
            message,
            payload,
        })
    }
}
