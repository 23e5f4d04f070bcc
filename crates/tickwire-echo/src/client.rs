//! Ping client application.

use std::time::Duration;

use tickwire_core::{Client, ClientEvent, ClientTransport, Message};

use crate::{
    driver::{TickApp, TickOutcome},
    error::EchoError,
};

/// Result of a ping session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReport {
    /// Pings sent
    pub sent: usize,
    /// Echoes that matched the ping payload
    pub echoed: usize,
    /// Echoes with unexpected contents
    pub mismatched: usize,
    /// Code the server closed the link with, if it did
    pub close_code: Option<u32>,
}

impl PingReport {
    /// True if every requested ping came back intact.
    pub fn is_complete(&self, count: usize) -> bool {
        self.echoed == count && self.mismatched == 0
    }
}

/// Sends `count` reliable pings, one at a time, and waits for each echo.
///
/// Finishes once every echo arrived (then disconnects gracefully) or the
/// server closed the link.
pub struct PingClient<T: ClientTransport> {
    client: Client<T>,
    payload: Vec<u8>,
    count: usize,
    sent: usize,
    echoed: usize,
    mismatched: usize,
    closed: bool,
    msg: Message,
}

impl<T: ClientTransport> PingClient<T> {
    /// Ping `count` times with `payload`. Call [`PingClient::start`] before
    /// ticking.
    pub fn new(client: Client<T>, payload: impl Into<Vec<u8>>, count: usize) -> Self {
        Self {
            client,
            payload: payload.into(),
            count,
            sent: 0,
            echoed: 0,
            mismatched: 0,
            closed: false,
            msg: Message::new(),
        }
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Session start errors.
    pub fn start(&mut self) -> Result<(), EchoError> {
        self.client.start()?;
        Ok(())
    }

    /// Release the link.
    pub fn stop(&mut self) {
        self.client.stop();
    }

    /// The wrapped session.
    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    /// Outcome so far.
    pub fn report(&self) -> PingReport {
        PingReport {
            sent: self.sent,
            echoed: self.echoed,
            mismatched: self.mismatched,
            close_code: self.client.server_close_code(),
        }
    }

    fn received(&self) -> usize {
        self.echoed + self.mismatched
    }
}

impl<T: ClientTransport> TickApp for PingClient<T> {
    fn tick(&mut self, delta: Duration) -> Result<TickOutcome, EchoError> {
        self.client.add_time(delta);

        while let Some(event) = self.client.poll()? {
            match event {
                ClientEvent::Connected => tracing::info!(pings = self.count, "connected"),
                ClientEvent::Disconnected => {
                    self.closed = true;
                    let code = self.client.server_close_code();
                    tracing::info!(?code, "server closed the link");
                },
                ClientEvent::MessageReceived => {
                    self.client.read_received_message(&mut self.msg)?;
                    if self.msg.bytes() == self.payload.as_slice() {
                        self.echoed += 1;
                        tracing::info!(echo = self.echoed, of = self.count, "echo received");
                    } else {
                        self.mismatched += 1;
                        tracing::warn!(len = self.msg.len(), "echo does not match ping");
                    }
                },
            }
        }

        if self.closed {
            return Ok(TickOutcome::Finished);
        }

        if self.received() >= self.count {
            self.client.disconnect()?;
            return Ok(TickOutcome::Finished);
        }

        if self.client.is_connected() && self.sent == self.received() {
            self.client.send_reliable(&self.payload)?;
            self.sent += 1;
        }

        self.client.flush()?;
        Ok(TickOutcome::Continue)
    }
}
