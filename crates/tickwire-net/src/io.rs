//! Non-blocking stream helpers shared by both transport halves.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use bytes::{Buf, BytesMut};
use tickwire_core::{Channel, OutgoingMessage, TransportError};
use tickwire_proto::Packet;

use crate::config::TcpConfig;

const READ_CHUNK: usize = 4096;

/// Result of draining a socket's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Socket is still open; nothing more to read right now.
    Open,
    /// Peer closed its write half.
    Eof,
}

/// Read everything the socket has into `inbound` without blocking.
pub(crate) fn read_available(
    stream: &mut TcpStream,
    inbound: &mut BytesMut,
) -> io::Result<ReadOutcome> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(n) => inbound.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Open),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
}

/// Write as much of `outbound` as the socket accepts without blocking.
pub(crate) fn write_pending(stream: &mut TcpStream, outbound: &mut BytesMut) -> io::Result<()> {
    while !outbound.is_empty() {
        match stream.write(&outbound[..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => outbound.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Encode `packet` onto the end of `outbound`.
pub(crate) fn queue_packet(outbound: &mut BytesMut, packet: &Packet) -> Result<(), TransportError> {
    packet.encode(outbound).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// What became of a message offered to a peer's outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// Appended to the buffer.
    Queued,
    /// Unreliable message dropped above the watermark.
    Dropped,
}

/// Apply the channel's queueing policy and append `message` to `outbound`.
///
/// # Errors
///
/// - `TransportError::QueueFull` if a reliable message would push the buffer
///   past `max_outbound_bytes`
pub(crate) fn enqueue_message(
    config: &TcpConfig,
    outbound: &mut BytesMut,
    channel: Channel,
    message: OutgoingMessage,
) -> Result<Enqueued, TransportError> {
    let message_type = message.message_type();
    let packet = Packet::message(channel.is_reliable(), message_type, message.into_payload());

    match channel {
        Channel::Unreliable if outbound.len() > config.unreliable_watermark => {
            return Ok(Enqueued::Dropped);
        },
        Channel::Reliable if outbound.len() + packet.encoded_len() > config.max_outbound_bytes => {
            return Err(TransportError::QueueFull {
                queued: outbound.len(),
                limit: config.max_outbound_bytes,
            });
        },
        _ => {},
    }

    queue_packet(outbound, &packet)?;
    Ok(Enqueued::Queued)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwire_core::create_outgoing_message;

    use super::*;

    fn small_config() -> TcpConfig {
        TcpConfig { max_outbound_bytes: 64, unreliable_watermark: 32, ..TcpConfig::default() }
    }

    #[test]
    fn unreliable_dropped_above_watermark() {
        let config = small_config();
        let mut outbound = BytesMut::from(&[0u8; 33][..]);

        let message = create_outgoing_message(b"tick").unwrap();
        let outcome = enqueue_message(&config, &mut outbound, Channel::Unreliable, message);

        assert_eq!(outcome, Ok(Enqueued::Dropped));
        assert_eq!(outbound.len(), 33);
    }

    #[test]
    fn reliable_past_limit_is_refused() {
        let config = small_config();
        let mut outbound = BytesMut::from(&[0u8; 40][..]);

        let message = create_outgoing_message(&[1u8; 16]).unwrap();
        let outcome = enqueue_message(&config, &mut outbound, Channel::Reliable, message);

        assert_eq!(outcome, Err(TransportError::QueueFull { queued: 40, limit: 64 }));
    }

    #[test]
    fn queued_message_decodes_back() {
        let config = small_config();
        let mut outbound = BytesMut::new();

        let message = create_outgoing_message(b"hi").unwrap();
        enqueue_message(&config, &mut outbound, Channel::Reliable, message).unwrap();

        let packet = Packet::decode_from(&mut outbound).unwrap().unwrap();
        assert!(packet.header.is_reliable());
        assert_eq!(&packet.payload[..], b"hi");
    }
}
