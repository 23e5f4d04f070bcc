//! Transport provider contract.
//!
//! The session layer never touches the network. Packet encoding,
//! retransmission, congestion control and fragmentation all live behind
//! [`ServerTransport`] and [`ClientTransport`]; the session core only needs
//! the operations declared here.
//!
//! # Event window
//!
//! Context for the most recent event ([`ServerTransport::message_info`],
//! [`ServerTransport::incoming_connection`],
//! [`ServerTransport::disconnected_client`]) stays valid until the next call
//! to `poll`. Implementations must not reclaim it earlier.

use std::{fmt, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::message::OutgoingMessage;

/// Stable identifier of a peer link, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Delivered in order; the transport retransmits as needed.
    Reliable,
    /// Best effort; may be dropped or reordered.
    Unreliable,
}

impl Channel {
    /// True for [`Channel::Reliable`].
    #[must_use]
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::Reliable)
    }
}

/// Liveness of a peer link.
///
/// ```text
/// Pending ──accept──> Accepted ──> Established
///    │                   │              │
///    └───────────────────┴──────────────┴──> Disconnected (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Peer asked to connect; waiting for accept or reject.
    Pending,
    /// Accepted by the server; acknowledgement not yet delivered.
    Accepted,
    /// Acknowledgement delivered; traffic flows both ways.
    Established,
    /// Link is gone. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// True while messages may be sent on the link.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Accepted | Self::Established)
    }
}

/// Context of the last received message, valid until the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// Sending connection. `None` when the sender is the server.
    pub sender: Option<ConnectionId>,
    /// Message type tag as carried by the transport.
    pub message_type: u8,
    /// Payload bytes, owned by the transport.
    pub payload: Bytes,
}

/// Raw server-side transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTransportEvent {
    /// A peer asked to connect; see [`ServerTransport::incoming_connection`].
    NewConnection,
    /// An accepted peer went away; see [`ServerTransport::disconnected_client`].
    ClientDisconnected,
    /// A message arrived; see [`ServerTransport::message_info`].
    ClientMessageReceived,
}

/// Raw client-side transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTransportEvent {
    /// The server accepted the connection.
    Connected,
    /// The link to the server is gone (closed, rejected or lost).
    Disconnected,
    /// A message arrived; see [`ClientTransport::message_info`].
    MessageReceived,
}

/// Failures reported by a transport provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not bind, listen or connect.
    #[error("failed to start transport: {0}")]
    Start(String),

    /// Operation requires a started transport.
    #[error("transport is not started")]
    NotStarted,

    /// Accept or reject called without a pending connection.
    #[error("no incoming connection")]
    NoIncomingConnection,

    /// Connection ID unknown to the transport.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Client-side send before the server accepted us.
    #[error("not connected to a server")]
    NotConnected,

    /// Outbound buffer for a peer exceeded its limit.
    #[error("outbound queue full ({queued} bytes queued, limit {limit})")]
    QueueFull {
        /// Bytes already queued
        queued: usize,
        /// Configured limit
        limit: usize,
    },

    /// Malformed traffic or inconsistent transport state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Server side of a transport provider.
pub trait ServerTransport {
    /// Start listening for `protocol_name` peers on `port`.
    fn start(&mut self, protocol_name: &str, port: u16) -> Result<(), TransportError>;

    /// Stop listening and release every connection. Idempotent.
    fn stop(&mut self);

    /// Advance the transport clock. Called once per tick before polling.
    fn add_time(&mut self, delta: Duration);

    /// Next event, or `None` once the queue is drained for this tick.
    fn poll(&mut self) -> Result<Option<ServerTransportEvent>, TransportError>;

    /// Last received message, if the last event was a message.
    fn message_info(&self) -> Option<&MessageInfo>;

    /// Connection behind the last [`ServerTransportEvent::NewConnection`].
    fn incoming_connection(&self) -> Option<ConnectionId>;

    /// Accept the incoming connection.
    fn accept_incoming_connection(&mut self) -> Result<ConnectionId, TransportError>;

    /// Reject the incoming connection, telling the peer `code`.
    fn reject_incoming_connection_with_code(&mut self, code: u32) -> Result<(), TransportError>;

    /// State of a connection. `None` if unknown or destroyed.
    fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState>;

    /// True if `id` is an accepted, live client.
    fn find_client(&self, id: ConnectionId) -> bool {
        self.connection_state(id).is_some_and(ConnectionState::is_connected)
    }

    /// Every accepted, live client.
    fn connected_clients(&self) -> Vec<ConnectionId>;

    /// Connection behind the last [`ServerTransportEvent::ClientDisconnected`].
    fn disconnected_client(&self) -> Option<ConnectionId>;

    /// Release the resources of a disconnected connection.
    fn destroy_connection(&mut self, id: ConnectionId);

    /// Enqueue a message for `id`; it goes out on the next
    /// [`ServerTransport::send_packets`].
    fn send_to(
        &mut self,
        id: ConnectionId,
        channel: Channel,
        message: OutgoingMessage,
    ) -> Result<(), TransportError>;

    /// Pack every enqueued message into packets and transmit them.
    fn send_packets(&mut self) -> Result<(), TransportError>;
}

/// Client side of a transport provider.
pub trait ClientTransport {
    /// Start connecting to `host:port` speaking `protocol_name`.
    fn start(&mut self, protocol_name: &str, host: &str, port: u16) -> Result<(), TransportError>;

    /// Tear down the link and release memory. Idempotent.
    fn stop(&mut self);

    /// Gracefully close the link to the server.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Advance the transport clock. Called once per tick before polling.
    fn add_time(&mut self, delta: Duration);

    /// Next event, or `None` once the queue is drained for this tick.
    fn poll(&mut self) -> Result<Option<ClientTransportEvent>, TransportError>;

    /// Last received message, if the last event was a message.
    fn message_info(&self) -> Option<&MessageInfo>;

    /// Enqueue a message for the server.
    fn send(&mut self, channel: Channel, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Pack every enqueued message into packets and transmit them.
    fn send_packets(&mut self) -> Result<(), TransportError>;

    /// Code the server gave when it rejected or closed the link.
    fn server_close_code(&self) -> Option<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_accepted_and_established_are_connected() {
        assert!(!ConnectionState::Pending.is_connected());
        assert!(ConnectionState::Accepted.is_connected());
        assert!(ConnectionState::Established.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn io_errors_convert() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(err, TransportError::Io("pipe closed".to_string()));
    }
}
