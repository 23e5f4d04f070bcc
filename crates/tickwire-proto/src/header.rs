//! Packet header with zero-copy parsing.
//!
//! The `PacketHeader` is a fixed 16-byte structure serialized as raw binary
//! (big endian). A stream reader can validate it and learn the payload length
//! without copying.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Client asks to connect; payload is the protocol name.
    Hello = 0x01,
    /// Server accepted the connection.
    Accept = 0x02,
    /// Server rejected or closed the connection; `code` says why.
    Reject = 0x03,
    /// Application message; payload is the message body.
    Message = 0x04,
    /// Peer is closing the link gracefully.
    Goodbye = 0x05,
}

impl PacketKind {
    /// Convert from the wire byte. `None` if unrecognized.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Accept),
            0x03 => Some(Self::Reject),
            0x04 => Some(Self::Message),
            0x05 => Some(Self::Goodbye),
            _ => None,
        }
    }

    /// Wire byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Fixed 16-byte packet header (big endian network byte order)
///
/// Fields are raw byte arrays, so every 16-byte pattern is a valid
/// `PacketHeader` and untrusted bytes can be cast directly.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    magic: [u8; 4],           // 0x544B5752 ("TKWR")
    version: u8,              // 0x01
    kind: u8,                 // PacketKind
    channel: u8,              // 0 = reliable, 1 = unreliable
    message_type: u8,         // application message type tag
    code: [u8; 4],            // u32 reject/close code
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl PacketHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 16;

    /// Magic number: "TKWR" in ASCII
    pub const MAGIC: u32 = 0x544B_5752;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Channel byte for reliable delivery
    pub const CHANNEL_RELIABLE: u8 = 0;

    /// Channel byte for unreliable delivery
    pub const CHANNEL_UNRELIABLE: u8 = 1;

    /// Create a header of the given kind with every other field zeroed.
    #[must_use]
    pub fn new(kind: PacketKind) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            kind: kind.to_u8(),
            channel: Self::CHANNEL_RELIABLE,
            message_type: 0,
            code: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// Cheap checks run first (length, magic) so garbage fails fast.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PacketTooShort` if fewer than 16 bytes
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` if the version is unknown
    /// - `ProtocolError::UnknownKind` if the kind byte is out of range
    /// - `ProtocolError::InvalidChannel` if the channel byte is out of range
    /// - `ProtocolError::PayloadTooLarge` if the payload size exceeds the limit
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::PacketTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if PacketKind::from_u8(header.kind).is_none() {
            return Err(ProtocolError::UnknownKind(header.kind));
        }

        if header.channel > Self::CHANNEL_UNRELIABLE {
            return Err(ProtocolError::InvalidChannel(header.channel));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Packet kind as raw byte.
    #[must_use]
    pub fn kind_byte(&self) -> u8 {
        self.kind
    }

    /// Packet kind. `None` if unrecognized; never `None` for a parsed header.
    #[must_use]
    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_u8(self.kind)
    }

    /// True for the reliable channel.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.channel == Self::CHANNEL_RELIABLE
    }

    /// Application message type tag.
    #[must_use]
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Reject or close code.
    #[must_use]
    pub fn code(&self) -> u32 {
        u32::from_be_bytes(self.code)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Select the delivery channel.
    pub fn set_reliable(&mut self, reliable: bool) {
        self.channel = if reliable { Self::CHANNEL_RELIABLE } else { Self::CHANNEL_UNRELIABLE };
    }

    /// Set the application message type tag.
    pub fn set_message_type(&mut self, message_type: u8) {
        self.message_type = message_type;
    }

    /// Set the reject or close code.
    pub fn set_code(&mut self, code: u32) {
        self.code = code.to_be_bytes();
    }

    /// Set payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("kind", &self.kind())
            .field("reliable", &self.is_reliable())
            .field("message_type", &self.message_type())
            .field("code", &self.code())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}
