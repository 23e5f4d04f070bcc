//! Message codec.
//!
//! Converts application byte slices into [`OutgoingMessage`]s handed to a
//! transport, and copies received payloads out of the transport's buffer into
//! a caller-owned [`Message`].
//!
//! Exactly one message type crosses this layer: an opaque byte array of at
//! most [`MAX_MESSAGE_SIZE`] bytes. The size limit is checked before any
//! transport call is made.

use bytes::Bytes;

use crate::{
    error::SessionError,
    transport::{ConnectionId, MessageInfo},
};

/// Largest payload, in bytes, a single message may carry.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Type tag of the byte-array message, the only type this layer carries.
pub const BYTE_ARRAY_MESSAGE_TYPE: u8 = 0;

/// A validated message waiting to be handed to a transport.
///
/// Not `Clone`: a send call takes it by value and the transport owns it from
/// then on. Every instance holds its own copy of the payload, so fan-out
/// means building one instance per destination.
#[derive(Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    payload: Bytes,
}

impl OutgoingMessage {
    /// Type tag carried on the wire.
    #[must_use]
    pub fn message_type(&self) -> u8 {
        BYTE_ARRAY_MESSAGE_TYPE
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for a zero-length payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, yielding its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Check a payload length against [`MAX_MESSAGE_SIZE`].
///
/// # Errors
///
/// - `SessionError::MessageTooLarge` if `len` exceeds the limit
pub fn validate_length(len: usize) -> Result<(), SessionError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(SessionError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    Ok(())
}

/// Build an outgoing message from application bytes.
///
/// The bytes are copied into a fresh buffer; the caller keeps ownership of
/// `bytes`.
///
/// # Errors
///
/// - `SessionError::MessageTooLarge` if `bytes` exceeds [`MAX_MESSAGE_SIZE`]
pub fn create_outgoing_message(bytes: &[u8]) -> Result<OutgoingMessage, SessionError> {
    validate_length(bytes.len())?;

    Ok(OutgoingMessage { payload: Bytes::copy_from_slice(bytes) })
}

/// Caller-owned receive buffer.
///
/// Allocated once with room for [`MAX_MESSAGE_SIZE`] bytes and reused across
/// reads; each read overwrites the previous contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
    sender_id: Option<ConnectionId>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Create an empty buffer with capacity for the largest message.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: Vec::with_capacity(MAX_MESSAGE_SIZE), sender_id: None }
    }

    /// Payload bytes of the last read.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length of the last read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing has been read or the last payload was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Connection that sent the last message. `None` on the client side,
    /// where the only sender is the server.
    #[must_use]
    pub fn sender_id(&self) -> Option<ConnectionId> {
        self.sender_id
    }
}

/// True if an inbound message with this tag and length can be read by
/// [`read_message`].
///
/// Transports check this before surfacing a peer's message. A peer that
/// sends anything else is disconnected; it never reaches the session.
#[must_use]
pub fn is_readable(message_type: u8, len: usize) -> bool {
    message_type == BYTE_ARRAY_MESSAGE_TYPE && len <= MAX_MESSAGE_SIZE
}

/// Copy a received message out of the transport's buffer.
///
/// # Errors
///
/// - `SessionError::UnexpectedMessageType` if the tag is not
///   [`BYTE_ARRAY_MESSAGE_TYPE`]
/// - `SessionError::MessageTooLarge` if the payload exceeds the limit
pub fn read_message(info: &MessageInfo, dst: &mut Message) -> Result<(), SessionError> {
    if info.message_type != BYTE_ARRAY_MESSAGE_TYPE {
        return Err(SessionError::UnexpectedMessageType(info.message_type));
    }

    validate_length(info.payload.len())?;

    dst.bytes.clear();
    dst.bytes.extend_from_slice(&info.payload);
    dst.sender_id = info.sender;

    debug_assert_eq!(dst.bytes.len(), info.payload.len());

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info(sender: Option<u32>, message_type: u8, payload: &'static [u8]) -> MessageInfo {
        MessageInfo {
            sender: sender.map(ConnectionId),
            message_type,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn oversized_message_is_rejected() {
        let bytes = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let result = create_outgoing_message(&bytes);

        assert_eq!(
            result,
            Err(SessionError::MessageTooLarge { size: MAX_MESSAGE_SIZE + 1, max: MAX_MESSAGE_SIZE })
        );
    }

    #[test]
    fn message_at_limit_is_accepted() {
        let bytes = vec![7u8; MAX_MESSAGE_SIZE];
        let message = create_outgoing_message(&bytes).unwrap();

        assert_eq!(message.len(), MAX_MESSAGE_SIZE);
        assert_eq!(message.message_type(), BYTE_ARRAY_MESSAGE_TYPE);
    }

    #[test]
    fn empty_message_is_accepted() {
        let message = create_outgoing_message(&[]).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn each_message_owns_its_payload() {
        let bytes = b"shared?";
        let a = create_outgoing_message(bytes).unwrap();
        let b = create_outgoing_message(bytes).unwrap();

        assert_eq!(a.payload(), b.payload());
        assert_ne!(a.payload().as_ptr(), b.payload().as_ptr());
        assert_ne!(a.payload().as_ptr(), bytes.as_ptr());
    }

    #[test]
    fn read_copies_payload_and_sender() {
        let mut dst = Message::new();
        read_message(&info(Some(3), BYTE_ARRAY_MESSAGE_TYPE, b"ping"), &mut dst).unwrap();

        assert_eq!(dst.bytes(), b"ping");
        assert_eq!(dst.len(), 4);
        assert_eq!(dst.sender_id(), Some(ConnectionId(3)));
    }

    #[test]
    fn read_overwrites_previous_contents() {
        let mut dst = Message::new();
        read_message(&info(Some(1), BYTE_ARRAY_MESSAGE_TYPE, b"a longer payload"), &mut dst)
            .unwrap();
        read_message(&info(None, BYTE_ARRAY_MESSAGE_TYPE, b"ok"), &mut dst).unwrap();

        assert_eq!(dst.bytes(), b"ok");
        assert_eq!(dst.sender_id(), None);
    }

    #[test]
    fn read_rejects_foreign_message_type() {
        let mut dst = Message::new();
        let result = read_message(&info(Some(1), 9, b"??"), &mut dst);

        assert_eq!(result, Err(SessionError::UnexpectedMessageType(9)));
        assert!(dst.is_empty());
    }

    #[test]
    fn readable_matches_read_message() {
        assert!(is_readable(BYTE_ARRAY_MESSAGE_TYPE, 0));
        assert!(is_readable(BYTE_ARRAY_MESSAGE_TYPE, MAX_MESSAGE_SIZE));
        assert!(!is_readable(BYTE_ARRAY_MESSAGE_TYPE, MAX_MESSAGE_SIZE + 1));
        assert!(!is_readable(9, 4));
    }

    #[test]
    fn read_rejects_oversized_payload() {
        let mut dst = Message::new();
        let payload = Bytes::from(vec![0u8; MAX_MESSAGE_SIZE + 10]);
        let info =
            MessageInfo { sender: None, message_type: BYTE_ARRAY_MESSAGE_TYPE, payload };

        assert!(matches!(
            read_message(&info, &mut dst),
            Err(SessionError::MessageTooLarge { .. })
        ));
    }
}
