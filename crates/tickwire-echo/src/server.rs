//! Echo server application.

use std::time::Duration;

use tickwire_core::{Admission, Message, Server, ServerEvent, ServerTransport, SessionError};

use crate::{
    driver::{TickApp, TickOutcome},
    error::EchoError,
};

/// Running totals for an [`EchoServer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoStats {
    /// Connection requests accepted
    pub admitted: u64,
    /// Connection requests refused with the busy code
    pub refused: u64,
    /// Messages echoed back
    pub echoed: u64,
    /// Echoes that could not be enqueued
    pub failed_echoes: u64,
    /// Clients that went away
    pub disconnects: u64,
}

/// Admits clients up to capacity and sends every message back to its sender
/// on the reliable channel.
pub struct EchoServer<T: ServerTransport> {
    server: Server<T>,
    msg: Message,
    stats: EchoStats,
}

impl<T: ServerTransport> EchoServer<T> {
    /// Wrap a server session. Call [`EchoServer::start`] before ticking.
    pub fn new(server: Server<T>) -> Self {
        Self { server, msg: Message::new(), stats: EchoStats::default() }
    }

    /// Start listening.
    ///
    /// # Errors
    ///
    /// Session start errors.
    pub fn start(&mut self) -> Result<(), EchoError> {
        self.server.start()?;
        Ok(())
    }

    /// Stop listening and drop every client.
    pub fn stop(&mut self) {
        self.server.stop();
    }

    /// The wrapped session.
    pub fn server(&self) -> &Server<T> {
        &self.server
    }

    /// Totals so far.
    pub fn stats(&self) -> EchoStats {
        self.stats
    }

    fn handle(&mut self, event: ServerEvent) -> Result<(), EchoError> {
        match event {
            ServerEvent::ConnectionRequest => match self.server.admit_incoming()? {
                Admission::Accepted(id) => {
                    self.stats.admitted += 1;
                    tracing::info!(client_id = %id, "client admitted");
                },
                Admission::Rejected(id) => {
                    self.stats.refused += 1;
                    tracing::info!(client_id = %id, "client refused, server busy");
                },
            },
            ServerEvent::ClientDisconnected => {
                self.stats.disconnects += 1;
                if let Some(id) = self.server.disconnected_client_id() {
                    tracing::info!(client_id = %id, "client disconnected");
                }
            },
            ServerEvent::MessageReceived => {
                self.server.read_received_message(&mut self.msg)?;
                let id = self.msg.sender_id().ok_or(SessionError::NoMessageAvailable)?;

                match self.server.send_reliable_to(id, self.msg.bytes()) {
                    Ok(()) => {
                        self.stats.echoed += 1;
                        tracing::debug!(client_id = %id, len = self.msg.len(), "echoed");
                    },
                    Err(err) if err.is_fatal() => return Err(err.into()),
                    Err(source) => {
                        self.stats.failed_echoes += 1;
                        return Err(EchoError::Echo { id, source });
                    },
                }
            },
        }

        Ok(())
    }
}

impl<T: ServerTransport> TickApp for EchoServer<T> {
    /// Drains every event even when an echo fails, then flushes. The first
    /// recoverable error is reported after the flush.
    fn tick(&mut self, delta: Duration) -> Result<TickOutcome, EchoError> {
        self.server.add_time(delta);

        let mut failure = None;

        while let Some(event) = self.server.poll()? {
            match self.handle(event) {
                Ok(()) => {},
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "echo failed");
                    failure.get_or_insert(err);
                },
            }
        }

        self.server.flush()?;

        match failure {
            Some(err) => Err(err),
            None => Ok(TickOutcome::Continue),
        }
    }
}
