//! Fuzz target for packet header boundary conditions
//!
//! # Strategy
//!
//! - Magic: valid, off-by-one, all-zeros, random
//! - Kind and channel: every byte value
//! - Payload size: zero, small, at-max, just-over-max, `u32::MAX`
//!
//! # Invariants
//!
//! - `payload_size > MAX_PAYLOAD_SIZE` MUST return `PayloadTooLarge`
//! - Bad magic MUST return `InvalidMagic`
//! - A declared size larger than the buffer MUST return `PacketTruncated`
//! - A header that validates has a known kind and encodes back unchanged

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tickwire_proto::{Packet, PacketHeader, ProtocolError};

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryHeader {
    magic: MagicBytes,
    version: u8,
    kind: u8,
    channel: u8,
    message_type: u8,
    code: u32,
    payload_size: PayloadSize,
    /// Bytes actually present after the header
    available: u16,
}

fuzz_target!(|boundary: BoundaryHeader| {
    let declared = match boundary.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Small(s) => u32::from(s),
        PayloadSize::AtMax => PacketHeader::MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => PacketHeader::MAX_PAYLOAD_SIZE + 1,
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(r) => r,
    };

    let magic = PacketHeader::MAGIC.to_be_bytes();
    let mut buffer = vec![0u8; PacketHeader::SIZE + usize::from(boundary.available)];

    match boundary.magic {
        MagicBytes::Valid => buffer[0..4].copy_from_slice(&magic),
        MagicBytes::OffByOne(offset) => {
            buffer[0..4].copy_from_slice(&magic);
            let idx = usize::from(offset % 4);
            buffer[idx] = buffer[idx].wrapping_add(1);
        },
        MagicBytes::AllZeros => buffer[0..4].fill(0),
        MagicBytes::Random(bytes) => buffer[0..4].copy_from_slice(&bytes),
    }

    buffer[4] = boundary.version;
    buffer[5] = boundary.kind;
    buffer[6] = boundary.channel;
    buffer[7] = boundary.message_type;
    buffer[8..12].copy_from_slice(&boundary.code.to_be_bytes());
    buffer[12..16].copy_from_slice(&declared.to_be_bytes());

    let magic_ok = buffer[0..4] == magic;

    match PacketHeader::from_bytes(&buffer) {
        Ok(header) => {
            assert!(magic_ok);
            assert!(header.kind().is_some());
            assert!(header.payload_size() <= PacketHeader::MAX_PAYLOAD_SIZE);
            assert_eq!(&header.to_bytes()[..], &buffer[..PacketHeader::SIZE]);
        },
        Err(ProtocolError::InvalidMagic) => assert!(!magic_ok),
        Err(ProtocolError::PayloadTooLarge { .. }) => {
            assert!(declared > PacketHeader::MAX_PAYLOAD_SIZE);
        },
        Err(_) => {},
    }

    match Packet::decode(&buffer) {
        Ok(packet) => assert_eq!(packet.payload.len(), declared as usize),
        Err(ProtocolError::PacketTruncated { expected, actual }) => {
            assert!(expected > actual);
        },
        Err(_) => {},
    }
});
