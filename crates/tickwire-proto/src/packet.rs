//! Packet type combining header and payload.
//!
//! Layout on the wire: `[PacketHeader: 16 bytes] + [payload: variable]`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    header::{PacketHeader, PacketKind},
};

/// Complete wire packet.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Packet::new`] and checked by [`Packet::decode`].
/// - `payload.len()` does not exceed [`PacketHeader::MAX_PAYLOAD_SIZE`].
///   Oversized packets can be built but [`Packet::encode`] refuses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, setting the header's payload size from `payload`.
    #[must_use]
    pub fn new(mut header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Lengths past u32::MAX saturate and are refused by `encode`.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.set_payload_size(payload_len);

        Self { header, payload }
    }

    /// Connection request carrying the protocol name.
    #[must_use]
    pub fn hello(protocol_name: &str) -> Self {
        let payload = Bytes::copy_from_slice(protocol_name.as_bytes());
        Self::new(PacketHeader::new(PacketKind::Hello), payload)
    }

    /// Connection accepted.
    #[must_use]
    pub fn accept() -> Self {
        Self::new(PacketHeader::new(PacketKind::Accept), Bytes::new())
    }

    /// Connection rejected or closed with `code`.
    #[must_use]
    pub fn reject(code: u32) -> Self {
        let mut header = PacketHeader::new(PacketKind::Reject);
        header.set_code(code);
        Self::new(header, Bytes::new())
    }

    /// Graceful close.
    #[must_use]
    pub fn goodbye() -> Self {
        Self::new(PacketHeader::new(PacketKind::Goodbye), Bytes::new())
    }

    /// Application message.
    #[must_use]
    pub fn message(reliable: bool, message_type: u8, payload: Bytes) -> Self {
        let mut header = PacketHeader::new(PacketKind::Message);
        header.set_reliable(reliable);
        header.set_message_type(message_type);
        Self::new(header, payload)
    }

    /// Packet kind.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownKind` for a header built from unvalidated bytes
    pub fn kind(&self) -> Result<PacketKind> {
        self.header.kind().ok_or(ProtocolError::UnknownKind(self.header.kind_byte()))
    }

    /// Protocol name carried by a Hello packet.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidProtocolName` if the payload is not UTF-8
    pub fn protocol_name(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidProtocolName)
    }

    /// Bytes this packet occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.payload.len()
    }

    /// Encode packet into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds 64 KiB
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > PacketHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: PacketHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode one packet from the front of `bytes`. Trailing bytes are
    /// ignored.
    ///
    /// # Errors
    ///
    /// - Any header error from [`PacketHeader::from_bytes`]
    /// - `ProtocolError::PacketTruncated` if the payload is incomplete
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = PacketHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(PacketHeader::SIZE..total_size) else {
            return Err(ProtocolError::PacketTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(PacketHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }

    /// Split one complete packet off the front of a stream buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a whole packet;
    /// nothing is consumed in that case. The payload shares the buffer's
    /// storage.
    ///
    /// # Errors
    ///
    /// - Any header error from [`PacketHeader::from_bytes`]. The stream is
    ///   unusable afterwards since packet boundaries are lost.
    pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < PacketHeader::SIZE {
            return Ok(None);
        }

        let header = *PacketHeader::from_bytes(&buf[..])?;
        let total_size = PacketHeader::SIZE + header.payload_size() as usize;

        if buf.len() < total_size {
            return Ok(None);
        }

        let payload = buf.split_to(total_size).freeze().slice(PacketHeader::SIZE..);

        debug_assert_eq!(payload.len(), header.payload_size() as usize);

        Ok(Some(Self { header, payload }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hello_carries_protocol_name() {
        let packet = Packet::hello("tickwire-echo");

        assert_eq!(packet.kind(), Ok(PacketKind::Hello));
        assert_eq!(packet.protocol_name(), Ok("tickwire-echo"));
        assert_eq!(packet.header.payload_size(), 13);
    }

    #[test]
    fn reject_carries_code() {
        let mut wire = Vec::new();
        Packet::reject(42).encode(&mut wire).unwrap();

        let parsed = Packet::decode(&wire).unwrap();
        assert_eq!(parsed.kind(), Ok(PacketKind::Reject));
        assert_eq!(parsed.header.code(), 42);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn reject_truncated_packet() {
        let mut wire = Vec::new();
        Packet::message(true, 0, Bytes::from_static(b"hello")).encode(&mut wire).unwrap();
        wire.truncate(wire.len() - 2);

        assert_eq!(
            Packet::decode(&wire),
            Err(ProtocolError::PacketTruncated { expected: 5, actual: 3 })
        );
    }

    #[test]
    fn refuse_to_encode_oversized_payload() {
        let payload = Bytes::from(vec![0u8; PacketHeader::MAX_PAYLOAD_SIZE as usize + 1]);
        let packet = Packet::message(false, 0, payload);

        let mut wire = Vec::new();
        assert!(matches!(packet.encode(&mut wire), Err(ProtocolError::PayloadTooLarge { .. })));
        assert!(wire.is_empty());
    }

    #[test]
    fn stream_decode_waits_for_whole_packet() {
        let mut wire = Vec::new();
        Packet::message(false, 0, Bytes::from_static(b"abcdef")).encode(&mut wire).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..10]);
        assert_eq!(Packet::decode_from(&mut buf), Ok(None));

        buf.extend_from_slice(&wire[10..20]);
        assert_eq!(Packet::decode_from(&mut buf), Ok(None));
        assert_eq!(buf.len(), 20);

        buf.extend_from_slice(&wire[20..]);
        let packet = Packet::decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"abcdef");
        assert!(!packet.header.is_reliable());
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_decode_splits_back_to_back_packets() {
        let mut buf = BytesMut::new();
        Packet::accept().encode(&mut buf).unwrap();
        Packet::message(true, 0, Bytes::from_static(b"x")).encode(&mut buf).unwrap();
        Packet::goodbye().encode(&mut buf).unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| Packet::decode_from(&mut buf).unwrap())
            .map(|p| p.kind().unwrap())
            .collect();

        assert_eq!(kinds, vec![PacketKind::Accept, PacketKind::Message, PacketKind::Goodbye]);
    }

    #[test]
    fn stream_decode_rejects_garbage() {
        let mut buf = BytesMut::from(&[0xAAu8; 32][..]);
        assert_eq!(Packet::decode_from(&mut buf), Err(ProtocolError::InvalidMagic));
    }
}
