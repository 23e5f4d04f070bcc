//! Wire format errors.

use thiserror::Error;

/// Result alias for wire format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Malformed or unsupported packet data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than a header
    #[error("packet too short: expected {expected} bytes, got {actual}")]
    PacketTooShort {
        /// Header size
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Magic number mismatch
    #[error("invalid magic number")]
    InvalidMagic,

    /// Version byte this build does not speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Packet kind byte out of range
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    /// Channel byte out of range
    #[error("invalid channel {0}")]
    InvalidChannel(u8),

    /// Payload larger than [`crate::PacketHeader::MAX_PAYLOAD_SIZE`]
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Fewer payload bytes than the header claims
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    PacketTruncated {
        /// Payload size claimed by the header
        expected: usize,
        /// Payload bytes available
        actual: usize,
    },

    /// Hello payload is not valid UTF-8
    #[error("protocol name is not valid UTF-8")]
    InvalidProtocolName,
}
