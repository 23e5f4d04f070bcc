//! Loopback client transport.

use std::time::Duration;

use tickwire_core::{
    Channel, ClientTransport, ClientTransportEvent, ConnectionId, MessageInfo, OutgoingMessage,
    TransportError, is_readable,
};

use crate::network::{SimNetwork, SimPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    Handshaking,
    Connected,
    Closed,
}

/// [`ClientTransport`] over a [`SimNetwork`].
pub struct SimClientTransport {
    network: SimNetwork,
    /// Server port and the ID the server knows us by
    endpoint: Option<(u16, ConnectionId)>,
    link: Link,
    outbound: Vec<SimPacket>,
    message: Option<MessageInfo>,
    close_code: Option<u32>,
}

impl SimClientTransport {
    pub(crate) fn new(network: SimNetwork) -> Self {
        Self {
            network,
            endpoint: None,
            link: Link::Idle,
            outbound: Vec::new(),
            message: None,
            close_code: None,
        }
    }

    /// ID the server assigned to this client. `None` before `start`.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.endpoint.map(|(_, id)| id)
    }

    fn started(&self) -> Result<(u16, ConnectionId), TransportError> {
        self.endpoint.ok_or(TransportError::NotStarted)
    }

    fn close(&mut self) -> ClientTransportEvent {
        self.link = Link::Closed;
        self.outbound.clear();
        ClientTransportEvent::Disconnected
    }
}

impl ClientTransport for SimClientTransport {
    fn start(&mut self, protocol_name: &str, _host: &str, port: u16) -> Result<(), TransportError> {
        let mut state = self.network.lock();

        let id = state
            .open_link(port)
            .ok_or_else(|| TransportError::Start(format!("connection refused on port {port}")))?;
        state.deliver_to_server(port, id, SimPacket::Hello {
            protocol_name: protocol_name.to_string(),
        });
        drop(state);

        self.endpoint = Some((port, id));
        self.link = Link::Handshaking;
        self.close_code = None;
        self.message = None;
        self.outbound.clear();

        Ok(())
    }

    fn stop(&mut self) {
        if let Some((port, id)) = self.endpoint.take() {
            self.network.lock().client_inboxes.remove(&(port, id));
        }

        self.link = Link::Idle;
        self.outbound.clear();
        self.message = None;
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let (port, id) = self.started()?;

        if matches!(self.link, Link::Handshaking | Link::Connected) {
            self.network.lock().deliver_to_server(port, id, SimPacket::Goodbye);
        }

        self.link = Link::Closed;
        self.outbound.clear();
        Ok(())
    }

    fn add_time(&mut self, _delta: Duration) {}

    fn poll(&mut self) -> Result<Option<ClientTransportEvent>, TransportError> {
        let (port, id) = self.started()?;

        self.message = None;

        loop {
            if self.link == Link::Closed {
                return Ok(None);
            }

            let next = self
                .network
                .lock()
                .client_inboxes
                .get_mut(&(port, id))
                .and_then(std::collections::VecDeque::pop_front);

            let Some(packet) = next else {
                return Ok(None);
            };

            let event = match (self.link, packet) {
                (Link::Handshaking, SimPacket::Accept) => {
                    self.link = Link::Connected;
                    ClientTransportEvent::Connected
                },
                (Link::Connected, SimPacket::Message { message_type, payload, .. }) => {
                    if is_readable(message_type, payload.len()) {
                        self.message = Some(MessageInfo { sender: None, message_type, payload });
                        ClientTransportEvent::MessageReceived
                    } else {
                        tracing::debug!(len = payload.len(), "invalid message");
                        self.network.lock().deliver_to_server(port, id, SimPacket::Goodbye);
                        self.close()
                    }
                },
                (_, SimPacket::Reject { code }) => {
                    self.close_code = Some(code);
                    self.close()
                },
                (_, SimPacket::Goodbye) => self.close(),
                (link, packet) => {
                    tracing::trace!(?link, ?packet, "packet ignored");
                    continue;
                },
            };

            return Ok(Some(event));
        }
    }

    fn message_info(&self) -> Option<&MessageInfo> {
        self.message.as_ref()
    }

    fn send(&mut self, channel: Channel, message: OutgoingMessage) -> Result<(), TransportError> {
        if self.link != Link::Connected {
            return Err(TransportError::NotConnected);
        }

        self.outbound.push(SimPacket::Message {
            channel,
            message_type: message.message_type(),
            payload: message.into_payload(),
        });
        Ok(())
    }

    fn send_packets(&mut self) -> Result<(), TransportError> {
        let (port, id) = self.started()?;
        let mut state = self.network.lock();

        for packet in self.outbound.drain(..) {
            let lost = matches!(
                &packet,
                SimPacket::Message { channel, .. } if state.should_drop(*channel)
            );
            if !lost {
                state.deliver_to_server(port, id, packet);
            }
        }

        Ok(())
    }

    fn server_close_code(&self) -> Option<u32> {
        self.close_code
    }
}
