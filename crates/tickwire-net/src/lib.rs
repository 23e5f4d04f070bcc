//! Non-blocking TCP transport provider.
//!
//! Implements [`tickwire_core::ServerTransport`] and
//! [`tickwire_core::ClientTransport`] over plain `std::net` sockets in
//! non-blocking mode, framed with [`tickwire_proto::Packet`].
//!
//! # Poll model
//!
//! Nothing runs in the background. Socket reads happen inside `poll` once per
//! tick (after `add_time`) when the event queue runs dry; socket writes happen
//! in `send_packets`. A session loop of
//!
//! ```text
//! add_time ──> poll until None ──> send ──> send_packets
//! ```
//!
//! therefore performs exactly one read pass and one write pass per tick.
//!
//! # Channels
//!
//! TCP is already reliable and ordered, so both channels share one stream.
//! The unreliable channel is best effort in a different sense: its messages
//! are dropped while a peer's outbound buffer is above
//! [`TcpConfig::unreliable_watermark`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod io;
mod server;

pub use client::TcpClientTransport;
pub use config::TcpConfig;
pub use server::TcpServerTransport;
