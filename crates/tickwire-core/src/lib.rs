//! Tickwire session layer.
//!
//! A thin, poll-driven layer between game-style application code and a
//! reliable/unreliable transport. The application drives it once per tick:
//!
//! ```text
//! add_time ──> poll until None ──> read / send ──> flush
//! ```
//!
//! # Architecture
//!
//! The core is Sans-IO. It never opens sockets, spawns threads or blocks; all
//! I/O happens behind the [`ServerTransport`] and [`ClientTransport`] traits,
//! which a concrete provider (TCP sockets, a deterministic loopback double,
//! ...) implements.
//!
//! # Components
//!
//! - [`message`]: validates outgoing payloads and copies received ones out
//! - [`Server`]: identity table, admission control and the server dispatcher
//! - [`Client`]: single server link and the client dispatcher
//! - [`policy`]: the thin fail-fast layer for programs that want to abort on
//!   fatal errors
//!
//! Every fallible operation returns [`SessionError`]. Nothing in the core
//! aborts the process on its own; [`SessionError::is_fatal`] tells the caller
//! which tier an error belongs to.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
pub mod message;
pub mod policy;
mod server;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use error::SessionError;
pub use event::{ClientEvent, ServerEvent};
pub use message::{
    BYTE_ARRAY_MESSAGE_TYPE, MAX_MESSAGE_SIZE, Message, OutgoingMessage, create_outgoing_message,
    is_readable,
};
pub use server::{
    Admission, DEFAULT_BUSY_CODE, DEFAULT_PORT, DEFAULT_PROTOCOL_NAME, DEFAULT_UNANSWERED_CODE,
    Server, ServerConfig,
};
pub use transport::{
    Channel, ClientTransport, ClientTransportEvent, ConnectionId, ConnectionState, MessageInfo,
    ServerTransport, ServerTransportEvent, TransportError,
};
