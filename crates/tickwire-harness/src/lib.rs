//! Deterministic loopback harness for tickwire sessions.
//!
//! [`SimNetwork`] is an in-memory network. It hands out
//! [`SimServerTransport`]s and [`SimClientTransport`]s that implement the
//! core's transport traits, so the real [`tickwire_core::Server`] and
//! [`tickwire_core::Client`] run unchanged on top of it.
//!
//! ```text
//!  Client ──send_packets──> server inbox ──poll──> Server
//!  Client <──poll── client inbox <──send_packets── Server
//! ```
//!
//! Delivery happens only on `send_packets`, so a test controls exactly when
//! traffic moves. Unreliable loss is driven by a seeded `ChaCha8Rng` and is
//! reproducible for a given seed.
//!
//! # Fault injection
//!
//! - [`SimNetwork::inject_to_server`]: deliver an arbitrary packet as if a
//!   client had sent it
//! - [`SimNetwork::inject_server_error`]: make the next server poll fail
//! - [`SimNetwork::fail_next_flush`]: make the next server flush fail
//! - [`SimNetwork::sent_messages`]: every message the server enqueued
//!
//! [`SimCluster`] wires one server and several clients together and drives
//! them tick by tick.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cluster;
pub mod network;
pub mod sim_client;
pub mod sim_server;

pub use cluster::{SimCluster, TICK};
pub use network::{SentMessage, SimNetwork, SimPacket};
pub use sim_client::SimClientTransport;
pub use sim_server::SimServerTransport;
