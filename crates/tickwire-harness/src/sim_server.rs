//! Loopback server transport.

use std::{collections::BTreeMap, time::Duration};

use tickwire_core::{
    Channel, ConnectionId, ConnectionState, MessageInfo, OutgoingMessage, ServerTransport,
    ServerTransportEvent, TransportError, is_readable,
};
use tickwire_proto::PROTOCOL_MISMATCH_CODE;

use crate::network::{SentMessage, SimNetwork, SimPacket};

/// [`ServerTransport`] over a [`SimNetwork`].
pub struct SimServerTransport {
    network: SimNetwork,
    port: Option<u16>,
    now: Duration,
    links: BTreeMap<ConnectionId, ConnectionState>,
    /// Staged until `send_packets`
    outbound: Vec<(ConnectionId, SimPacket)>,

    incoming: Option<ConnectionId>,
    disconnected: Option<ConnectionId>,
    message: Option<MessageInfo>,
}

impl SimServerTransport {
    pub(crate) fn new(network: SimNetwork) -> Self {
        Self {
            network,
            port: None,
            now: Duration::ZERO,
            links: BTreeMap::new(),
            outbound: Vec::new(),
            incoming: None,
            disconnected: None,
            message: None,
        }
    }

    /// Port this transport listens on. `None` when stopped.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Total simulated time passed to `add_time`.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Connections still known to the transport, in any state.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn started_port(&self) -> Result<u16, TransportError> {
        self.port.ok_or(TransportError::NotStarted)
    }

    /// Turn one inbound packet into an event, or `None` to keep draining.
    fn handle_packet(
        &mut self,
        port: u16,
        from: ConnectionId,
        packet: SimPacket,
        protocol_name: &str,
    ) -> Option<ServerTransportEvent> {
        let state = self.links.get(&from).copied();

        match (state, packet) {
            (None, SimPacket::Hello { protocol_name: theirs }) => {
                if theirs == protocol_name {
                    self.links.insert(from, ConnectionState::Pending);
                    self.incoming = Some(from);
                    Some(ServerTransportEvent::NewConnection)
                } else {
                    tracing::debug!(client_id = %from, %theirs, "protocol mismatch");
                    self.network.lock().deliver_to_client(port, from, SimPacket::Reject {
                        code: PROTOCOL_MISMATCH_CODE,
                    });
                    None
                }
            },
            (Some(state), SimPacket::Message { message_type, payload, .. })
                if state.is_connected() =>
            {
                if !is_readable(message_type, payload.len()) {
                    tracing::debug!(client_id = %from, len = payload.len(), "invalid message");
                    self.network.lock().deliver_to_client(port, from, SimPacket::Goodbye);
                    self.links.insert(from, ConnectionState::Disconnected);
                    self.disconnected = Some(from);
                    return Some(ServerTransportEvent::ClientDisconnected);
                }
                self.message = Some(MessageInfo { sender: Some(from), message_type, payload });
                Some(ServerTransportEvent::ClientMessageReceived)
            },
            (Some(state), SimPacket::Goodbye) if state != ConnectionState::Disconnected => {
                self.links.insert(from, ConnectionState::Disconnected);
                self.disconnected = Some(from);
                Some(ServerTransportEvent::ClientDisconnected)
            },
            (state, packet) => {
                tracing::trace!(client_id = %from, ?state, ?packet, "packet ignored");
                None
            },
        }
    }
}

impl ServerTransport for SimServerTransport {
    fn start(&mut self, protocol_name: &str, port: u16) -> Result<(), TransportError> {
        if !self.network.listen(port, protocol_name) {
            return Err(TransportError::Start(format!("port {port} already in use")));
        }

        self.port = Some(port);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(port) = self.port.take() else {
            return;
        };

        {
            let mut state = self.network.lock();
            for (id, link) in &self.links {
                if link.is_connected() {
                    state.deliver_to_client(port, *id, SimPacket::Goodbye);
                }
            }
        }

        self.network.unlisten(port);
        self.links.clear();
        self.outbound.clear();
        self.incoming = None;
        self.disconnected = None;
        self.message = None;
    }

    fn add_time(&mut self, delta: Duration) {
        self.now += delta;
    }

    fn poll(&mut self) -> Result<Option<ServerTransportEvent>, TransportError> {
        let port = self.started_port()?;

        self.incoming = None;
        self.disconnected = None;
        self.message = None;

        loop {
            let (next, protocol_name) = {
                let mut state = self.network.lock();
                let server = state.servers.get_mut(&port).ok_or(TransportError::NotStarted)?;

                if let Some(reason) = server.injected_errors.pop_front() {
                    return Err(TransportError::Protocol(reason));
                }

                (server.inbox.pop_front(), server.protocol_name.clone())
            };

            let Some((from, packet)) = next else {
                return Ok(None);
            };

            if let Some(event) = self.handle_packet(port, from, packet, &protocol_name) {
                return Ok(Some(event));
            }
        }
    }

    fn message_info(&self) -> Option<&MessageInfo> {
        self.message.as_ref()
    }

    fn incoming_connection(&self) -> Option<ConnectionId> {
        self.incoming
    }

    fn accept_incoming_connection(&mut self) -> Result<ConnectionId, TransportError> {
        let id = self.incoming.ok_or(TransportError::NoIncomingConnection)?;

        match self.links.get_mut(&id) {
            Some(state) if *state == ConnectionState::Pending => {
                *state = ConnectionState::Accepted;
            },
            _ => return Err(TransportError::NoIncomingConnection),
        }

        self.outbound.push((id, SimPacket::Accept));
        Ok(id)
    }

    fn reject_incoming_connection_with_code(&mut self, code: u32) -> Result<(), TransportError> {
        let id = self.incoming.ok_or(TransportError::NoIncomingConnection)?;

        if self.links.get(&id) != Some(&ConnectionState::Pending) {
            return Err(TransportError::NoIncomingConnection);
        }

        self.links.remove(&id);
        self.outbound.push((id, SimPacket::Reject { code }));
        Ok(())
    }

    fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.links.get(&id).copied()
    }

    fn connected_clients(&self) -> Vec<ConnectionId> {
        self.links.iter().filter(|(_, s)| s.is_connected()).map(|(id, _)| *id).collect()
    }

    fn disconnected_client(&self) -> Option<ConnectionId> {
        self.disconnected
    }

    fn destroy_connection(&mut self, id: ConnectionId) {
        self.links.remove(&id);
    }

    fn send_to(
        &mut self,
        id: ConnectionId,
        channel: Channel,
        message: OutgoingMessage,
    ) -> Result<(), TransportError> {
        let port = self.started_port()?;

        if !self.links.get(&id).is_some_and(|s| s.is_connected()) {
            return Err(TransportError::UnknownConnection(id));
        }

        let message_type = message.message_type();
        let payload = message.into_payload();

        if let Some(server) = self.network.lock().servers.get_mut(&port) {
            server.sent.push(SentMessage { to: id, channel, payload: payload.clone() });
        }

        self.outbound.push((id, SimPacket::Message { channel, message_type, payload }));
        Ok(())
    }

    fn send_packets(&mut self) -> Result<(), TransportError> {
        let port = self.started_port()?;
        let mut state = self.network.lock();

        let fail =
            state.servers.get_mut(&port).is_some_and(|s| std::mem::take(&mut s.fail_next_flush));
        if fail {
            return Err(TransportError::Io("injected flush failure".to_string()));
        }

        for (id, packet) in self.outbound.drain(..) {
            let lost = matches!(
                &packet,
                SimPacket::Message { channel, .. } if state.should_drop(*channel)
            );
            if lost {
                tracing::trace!(client_id = %id, "unreliable packet lost");
                continue;
            }

            if packet == SimPacket::Accept
                && self.links.get(&id) == Some(&ConnectionState::Accepted)
            {
                self.links.insert(id, ConnectionState::Established);
            }

            state.deliver_to_client(port, id, packet);
        }

        Ok(())
    }
}
