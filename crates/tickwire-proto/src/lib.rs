//! Tickwire wire format.
//!
//! Every packet is a fixed 16-byte header followed by a variable payload:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┐
//! │ PacketHeader (16 bytes)  │ payload (0..=64 KiB)     │
//! │ raw binary, big endian   │ raw bytes                │
//! └──────────────────────────┴──────────────────────────┘
//! ```
//!
//! The header is parsed in place with `zerocopy`, so a stream reader can
//! decide how many bytes it needs before copying anything.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod header;
pub mod packet;

pub use errors::{ProtocolError, Result};
pub use header::{PacketHeader, PacketKind};
pub use packet::Packet;

/// Close code sent to peers that present the wrong protocol name.
pub const PROTOCOL_MISMATCH_CODE: u32 = 0xFFFF_0001;
