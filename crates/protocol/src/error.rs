//! Protocol error types

use thiserror::Error;

/// Errors raised while building decoded events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload exceeds the largest message the driver can deliver
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Channel number outside the addressable range
    #[error("Invalid channel number: {0} (max: {max})", max = crate::MAX_CHANNELS - 1)]
    InvalidChannel(u8),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadTooLarge { size: 64, max: 41 };
        let msg = format!("{}", err);
        assert!(msg.contains("Payload too large"));
        assert!(msg.contains("64"));
        assert!(msg.contains("41"));
    }

    #[test]
    fn test_invalid_channel_error() {
        let msg = ProtocolError::InvalidChannel(40).to_string();
        assert!(msg.contains("40"));
        assert!(msg.contains("31"));
    }
}
