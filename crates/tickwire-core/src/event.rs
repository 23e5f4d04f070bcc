//! Application-facing events.
//!
//! Events carry no data. The payload and the pending connection are read
//! through accessors on [`crate::Server`] and [`crate::Client`], valid until
//! the next `poll`. The most recently disconnected client stays readable
//! until another one disconnects.

/// Events produced by [`crate::Server::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer asked to connect. Answer with `accept_incoming`,
    /// `reject_incoming` or `admit_incoming` before the next poll.
    ConnectionRequest,
    /// An accepted client went away; see `disconnected_client_id`.
    ClientDisconnected,
    /// A client message arrived; see `read_received_message`.
    MessageReceived,
}

/// Events produced by [`crate::Client::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the connection.
    Connected,
    /// The link to the server is gone.
    Disconnected,
    /// A server message arrived; see `read_received_message`.
    MessageReceived,
}
