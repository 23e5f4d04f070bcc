//! Error types for the session layer.
//!
//! Two tiers. Fatal errors mean API misuse or a broken transport invariant:
//! oversized messages, stale client IDs, transport failures while polling,
//! failure to start. The session cannot safely continue past them. Recoverable
//! errors affect one tick only (a failed flush, a send the transport refused)
//! and the caller decides whether to retry or stop.
//!
//! The core only classifies; terminating the process is left to
//! [`crate::policy`].

use thiserror::Error;

use crate::transport::{ConnectionId, TransportError};

/// Errors returned by [`crate::Server`], [`crate::Client`] and the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Payload exceeds [`crate::MAX_MESSAGE_SIZE`]
    #[error("cannot create a message of {size} bytes (limit is {max} bytes)")]
    MessageTooLarge {
        /// Offending payload size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Received a message of a type this layer does not carry
    #[error("unexpected message type {0}")]
    UnexpectedMessageType(u8),

    /// Operation on a session that is not started
    #[error("session is not started")]
    NotStarted,

    /// `start` on a session that is already running
    #[error("session is already started")]
    AlreadyStarted,

    /// Transport failed to bind, listen or connect
    #[error("failed to start: {0}")]
    StartFailed(#[source] TransportError),

    /// Accept or reject without a pending connection request
    #[error("no pending connection request")]
    NoPendingConnection,

    /// Accepting would exceed the identity table's capacity
    #[error("identity table is full ({max_clients} clients)")]
    CapacityReached {
        /// Configured capacity
        max_clients: usize,
    },

    /// Client ID is unknown or stale
    #[error("client {0} does not exist")]
    UnknownClient(ConnectionId),

    /// Client-side send while not connected to a server
    #[error("not connected to a server")]
    NotConnected,

    /// Read outside the window after a message event
    #[error("no received message to read")]
    NoMessageAvailable,

    /// Transport failed to accept the pending connection
    #[error("failed to accept connection: {0}")]
    Accept(#[source] TransportError),

    /// Transport failed to reject the pending connection
    #[error("failed to reject connection: {0}")]
    Reject(#[source] TransportError),

    /// Transport refused to enqueue a message
    #[error("failed to send message: {0}")]
    Send(#[source] TransportError),

    /// Broadcast enqueued for some peers but the transport refused others
    #[error("broadcast enqueued for {enqueued} clients, refused for {refused}: {source}")]
    PartialBroadcast {
        /// Messages the transport accepted
        enqueued: usize,
        /// Messages the transport refused
        refused: usize,
        /// First refusal
        #[source]
        source: TransportError,
    },

    /// Transport failed to transmit queued packets
    #[error("failed to flush packets: {0}")]
    Flush(#[source] TransportError),

    /// Transport reported an internal error while polling
    #[error("transport error while polling: {0}")]
    Poll(#[source] TransportError),

    /// Transport failed to close the link
    #[error("failed to disconnect: {0}")]
    Disconnect(#[source] TransportError),
}

impl SessionError {
    /// Returns true if the session cannot safely continue.
    ///
    /// Only [`SessionError::Flush`], [`SessionError::Send`] and
    /// [`SessionError::PartialBroadcast`] are recoverable. A refused send is
    /// followed by a disconnect event for the affected peer, so the caller
    /// can carry on with the next tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Flush(_) | Self::Send(_) | Self::PartialBroadcast { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_and_send_failures_are_recoverable() {
        assert!(!SessionError::Flush(TransportError::Io("reset".to_string())).is_fatal());
        assert!(
            !SessionError::Send(TransportError::QueueFull { queued: 10, limit: 8 }).is_fatal()
        );
        assert!(
            !SessionError::PartialBroadcast {
                enqueued: 2,
                refused: 1,
                source: TransportError::QueueFull { queued: 10, limit: 8 },
            }
            .is_fatal()
        );
    }

    #[test]
    fn misuse_and_transport_corruption_are_fatal() {
        assert!(SessionError::MessageTooLarge { size: 5000, max: 4096 }.is_fatal());
        assert!(SessionError::UnknownClient(ConnectionId(4)).is_fatal());
        assert!(SessionError::NoPendingConnection.is_fatal());
        assert!(SessionError::CapacityReached { max_clients: 1 }.is_fatal());
        assert!(SessionError::Poll(TransportError::Protocol("bad".to_string())).is_fatal());
        assert!(SessionError::StartFailed(TransportError::Start("in use".to_string())).is_fatal());
        assert!(SessionError::UnexpectedMessageType(3).is_fatal());
    }

    #[test]
    fn display_includes_source() {
        let err = SessionError::Flush(TransportError::Io("connection reset".to_string()));
        assert_eq!(err.to_string(), "failed to flush packets: I/O error: connection reset");

        let err = SessionError::UnknownClient(ConnectionId(7));
        assert_eq!(err.to_string(), "client 7 does not exist");
    }
}
