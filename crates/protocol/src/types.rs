//! ANT identifier types
//!
//! Channel numbers, channel event codes and response message ids as the ANT
//! library reports them to its callbacks. Unknown codes are preserved so a
//! newer firmware never causes a decode failure in the bridge.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest payload the driver hands to a callback (ANT `MESG_MAX_SIZE_VALUE`)
pub const MAX_MESSAGE_SIZE: usize = 41;

/// Number of addressable channels
pub const MAX_CHANNELS: u8 = 32;

/// Mask of the channel number in the first byte of burst data
pub const CHANNEL_NUMBER_MASK: u8 = 0x1F;

/// Mask of the sequence number in the first byte of burst data
pub const SEQUENCE_NUMBER_MASK: u8 = 0xE0;

/// ANT channel number
///
/// Unique while the channel is open. The driver reuses numbers after a
/// channel is closed or the device is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(pub u8);

impl ChannelId {
    /// Create a channel id, rejecting numbers the radio cannot address
    pub fn new(number: u8) -> Result<Self> {
        if number >= MAX_CHANNELS {
            return Err(ProtocolError::InvalidChannel(number));
        }
        Ok(Self(number))
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ProtocolError;

    fn try_from(number: u8) -> Result<Self> {
        Self::new(number)
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> u8 {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract the channel number from the first byte of a burst packet
pub fn burst_channel(first_byte: u8) -> u8 {
    first_byte & CHANNEL_NUMBER_MASK
}

/// Extract the 3-bit sequence number from the first byte of a burst packet
pub fn burst_sequence(first_byte: u8) -> u8 {
    (first_byte & SEQUENCE_NUMBER_MASK) >> 5
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "u8", into = "u8")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Code not known to this library
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(code: u8) -> Self {
                match code {
                    $( $code => Self::$variant, )+
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(id: $name) -> u8 {
                match id {
                    $( $name::$variant => $code, )+
                    $name::Unknown(other) => other,
                }
            }
        }

        impl $name {
            /// Short lowercase name used in log output
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                    Self::Unknown(_) => "unknown",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} ({:#04x})", self.name(), u8::from(*self))
            }
        }
    };
}

code_enum! {
    /// Channel event code delivered to a channel's event callback
    EventId {
        RxSearchTimeout = 0x01 => "rx_search_timeout",
        RxFail = 0x02 => "rx_fail",
        Tx = 0x03 => "tx",
        TransferRxFailed = 0x04 => "transfer_rx_failed",
        TransferTxCompleted = 0x05 => "transfer_tx_completed",
        TransferTxFailed = 0x06 => "transfer_tx_failed",
        ChannelClosed = 0x07 => "channel_closed",
        RxFailGoToSearch = 0x08 => "rx_fail_go_to_search",
        ChannelCollision = 0x09 => "channel_collision",
        TransferTxStart = 0x0A => "transfer_tx_start",
        RxExtAcknowledged = 0x5D => "rx_ext_acknowledged",
        RxExtBurstPacket = 0x5E => "rx_ext_burst_packet",
        RxExtBroadcast = 0x5F => "rx_ext_broadcast",
        RxFlagAcknowledged = 0x9A => "rx_flag_acknowledged",
        RxFlagBurstPacket = 0x9B => "rx_flag_burst_packet",
        RxFlagBroadcast = 0x9C => "rx_flag_broadcast",
        RxAcknowledged = 0x9D => "rx_acknowledged",
        RxBurstPacket = 0x9E => "rx_burst_packet",
        RxBroadcast = 0x9F => "rx_broadcast",
    }
}

code_enum! {
    /// Message id of a response delivered to the device-wide response callback
    MessageId {
        Version = 0x3E => "version",
        ResponseEvent = 0x40 => "response_event",
        UnassignChannel = 0x41 => "unassign_channel",
        AssignChannel = 0x42 => "assign_channel",
        ChannelMesgPeriod = 0x43 => "channel_mesg_period",
        ChannelSearchTimeout = 0x44 => "channel_search_timeout",
        ChannelRadioFreq = 0x45 => "channel_radio_freq",
        NetworkKey = 0x46 => "network_key",
        RadioTxPower = 0x47 => "radio_tx_power",
        SystemReset = 0x4A => "system_reset",
        OpenChannel = 0x4B => "open_channel",
        CloseChannel = 0x4C => "close_channel",
        Request = 0x4D => "request",
        BroadcastData = 0x4E => "broadcast_data",
        AcknowledgedData = 0x4F => "acknowledged_data",
        BurstData = 0x50 => "burst_data",
        ChannelIdMesg = 0x51 => "channel_id",
        ChannelStatus = 0x52 => "channel_status",
        Capabilities = 0x54 => "capabilities",
        GetSerialNum = 0x61 => "get_serial_num",
        StartupMesg = 0x6F => "startup_mesg",
    }
}

impl EventId {
    /// Whether the event carries received data (as opposed to a status code)
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::RxExtAcknowledged
                | Self::RxExtBurstPacket
                | Self::RxExtBroadcast
                | Self::RxFlagAcknowledged
                | Self::RxFlagBurstPacket
                | Self::RxFlagBroadcast
                | Self::RxAcknowledged
                | Self::RxBurstPacket
                | Self::RxBroadcast
        )
    }

    /// Whether the event is a burst packet of any flavour
    pub fn is_burst(&self) -> bool {
        matches!(
            self,
            Self::RxBurstPacket | Self::RxExtBurstPacket | Self::RxFlagBurstPacket
        )
    }
}

/// Why the device reset, decoded from the first byte of a startup message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetReason {
    PowerOn,
    Suspend,
    Sync,
    Command,
    Watchdog,
    ResetPin,
    Unknown(u8),
}

impl ResetReason {
    pub fn from_startup_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::PowerOn,
            0x80 => Self::Suspend,
            0x40 => Self::Sync,
            0x20 => Self::Command,
            0x02 => Self::Watchdog,
            0x01 => Self::ResetPin,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => f.write_str("RESET_POR"),
            Self::Suspend => f.write_str("RESET_SUSPEND"),
            Self::Sync => f.write_str("RESET_SYNC"),
            Self::Command => f.write_str("RESET_CMD"),
            Self::Watchdog => f.write_str("RESET_WDT"),
            Self::ResetPin => f.write_str("RESET_RST"),
            Self::Unknown(byte) => write!(f, "unknown reason {:#04x}", byte),
        }
    }
}
