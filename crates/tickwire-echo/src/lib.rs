//! Echo programs on top of tickwire sessions.
//!
//! Two small applications, generic over the transport so they run on real
//! sockets in the binaries and on the loopback harness in tests:
//!
//! - [`EchoServer`]: admits up to `max_clients`, refuses the rest with the
//!   busy code, sends every message back to its sender
//! - [`PingClient`]: sends N pings one at a time and checks each echo
//!
//! Both implement [`TickApp`] and are paced by a [`TickDriver`], which runs
//! the fixed-timestep loop on a current-thread tokio runtime and stops on
//! ctrl-c.
//!
//! # Errors
//!
//! Recoverable errors (failed flush, failed echo) are counted per tick and
//! the loop carries on; the binaries exit with status 1 if any tick reported
//! one. Fatal session errors end the loop and the binaries abort through
//! [`tickwire_core::policy`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod driver;
mod error;
mod server;

pub use client::{PingClient, PingReport};
pub use driver::{RunSummary, TickApp, TickDriver, TickOutcome};
pub use error::EchoError;
pub use server::{EchoServer, EchoStats};

/// Protocol name both binaries default to.
pub const ECHO_PROTOCOL_NAME: &str = "tickwire-echo";

/// Tick rate both binaries default to, in Hz.
pub const DEFAULT_TICK_RATE: u32 = 60;
