//! ANT event vocabulary for ant-bridge
//!
//! The driver layer decodes raw device messages into the types defined here
//! before handing them to the callback bridge. Payloads stay opaque; this
//! crate only knows their identifiers and size limits.
//!
//! # Example
//!
//! ```
//! use protocol::{ChannelEvent, ChannelId, EventId};
//!
//! let event = ChannelEvent::new(ChannelId(3), EventId::RxBroadcast, &b"\x01\x02"[..]).unwrap();
//! assert_eq!(event.channel, ChannelId(3));
//! assert_eq!(event.payload.len(), 2);
//! ```

pub mod error;
pub mod events;
pub mod types;

pub use error::{ProtocolError, Result};
pub use events::{ChannelEvent, ResponseEvent};
pub use types::{
    CHANNEL_NUMBER_MASK, ChannelId, EventId, MAX_CHANNELS, MAX_MESSAGE_SIZE, MessageId,
    ResetReason, SEQUENCE_NUMBER_MASK, burst_channel, burst_sequence,
};
