//! Server half of the TCP transport.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    time::Duration,
};

use bytes::BytesMut;
use tickwire_core::{
    Channel, ConnectionId, ConnectionState, MessageInfo, OutgoingMessage, ServerTransport,
    ServerTransportEvent, TransportError, is_readable,
};
use tickwire_proto::{PROTOCOL_MISMATCH_CODE, Packet, PacketKind};

use crate::{
    config::TcpConfig,
    io::{self as stream_io, Enqueued, ReadOutcome},
};

/// Queued event, resolved against peer state when popped.
#[derive(Debug)]
enum Queued {
    NewConnection(ConnectionId),
    Disconnected(ConnectionId),
    Message(MessageInfo),
}

/// Link state as the transport sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    /// Socket accepted, Hello not yet received. Invisible to the session.
    Handshaking,
    /// Visible to the session with this state.
    Visible(ConnectionState),
}

#[derive(Debug)]
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    state: LinkState,
    inbound: BytesMut,
    outbound: BytesMut,
    accepted_at: Duration,
    /// Socket is dead; a disconnect event is queued or delivered.
    lost: bool,
}

/// Peer that was rejected and only needs its last packet written.
#[derive(Debug)]
struct Closing {
    stream: TcpStream,
    outbound: BytesMut,
}

/// TCP implementation of [`ServerTransport`].
///
/// Connection IDs are assigned from 1 upward and never reused while the
/// transport runs.
#[derive(Debug)]
pub struct TcpServerTransport {
    config: TcpConfig,
    listener: Option<TcpListener>,
    protocol_name: String,
    next_id: u32,
    now: Duration,
    pumped: bool,
    peers: BTreeMap<ConnectionId, Peer>,
    closing: Vec<Closing>,
    events: VecDeque<Queued>,

    // Context of the last polled event, valid until the next poll
    incoming: Option<ConnectionId>,
    disconnected: Option<ConnectionId>,
    message: Option<MessageInfo>,
}

impl TcpServerTransport {
    /// Create a stopped transport.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            listener: None,
            protocol_name: String::new(),
            next_id: 1,
            now: Duration::ZERO,
            pumped: false,
            peers: BTreeMap::new(),
            closing: Vec::new(),
            events: VecDeque::new(),
            incoming: None,
            disconnected: None,
            message: None,
        }
    }

    /// Address the listener is bound to. `None` when stopped.
    ///
    /// Useful after starting on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Remote address of a connection.
    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.peers.get(&id).map(|p| p.addr)
    }

    /// Read from every socket and queue the resulting events.
    fn pump(&mut self) {
        self.accept_sockets();

        let ids: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for id in ids {
            self.read_peer(id);
        }

        self.expire_handshakes();
    }

    fn accept_sockets(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = prepare_stream(&stream) {
                        tracing::warn!(%addr, error = %err, "failed to configure socket");
                        continue;
                    }

                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;

                    tracing::debug!(client_id = %id, %addr, "socket accepted");

                    self.peers.insert(id, Peer {
                        stream,
                        addr,
                        state: LinkState::Handshaking,
                        inbound: BytesMut::new(),
                        outbound: BytesMut::new(),
                        accepted_at: self.now,
                        lost: false,
                    });
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                },
            }
        }
    }

    fn read_peer(&mut self, id: ConnectionId) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.lost {
            return;
        }

        let outcome = stream_io::read_available(&mut peer.stream, &mut peer.inbound);

        loop {
            let Some(peer) = self.peers.get_mut(&id) else {
                return;
            };
            if peer.lost {
                return;
            }

            match Packet::decode_from(&mut peer.inbound) {
                Ok(Some(packet)) => self.handle_packet(id, packet),
                Ok(None) => break,
                Err(err) => {
                    self.lose(id, &format!("malformed packet: {err}"));
                    return;
                },
            }
        }

        match outcome {
            Ok(ReadOutcome::Open) => {},
            Ok(ReadOutcome::Eof) => self.lose(id, "peer closed the connection"),
            Err(err) => self.lose(id, &format!("read failed: {err}")),
        }
    }

    fn handle_packet(&mut self, id: ConnectionId, packet: Packet) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };

        let Ok(kind) = packet.kind() else {
            self.lose(id, "unknown packet kind");
            return;
        };

        match (peer.state, kind) {
            (LinkState::Handshaking, PacketKind::Hello) => {
                if packet.protocol_name() == Ok(self.protocol_name.as_str()) {
                    peer.state = LinkState::Visible(ConnectionState::Pending);
                    self.events.push_back(Queued::NewConnection(id));
                } else {
                    tracing::warn!(client_id = %id, "protocol mismatch, rejecting");
                    self.close_with_code(id, PROTOCOL_MISMATCH_CODE);
                }
            },
            (LinkState::Visible(state), PacketKind::Message) if state.is_connected() => {
                if !is_readable(packet.header.message_type(), packet.payload.len()) {
                    self.lose(id, "invalid message");
                    return;
                }
                self.events.push_back(Queued::Message(MessageInfo {
                    sender: Some(id),
                    message_type: packet.header.message_type(),
                    payload: packet.payload,
                }));
            },
            (LinkState::Visible(ConnectionState::Pending), PacketKind::Message) => {
                tracing::warn!(client_id = %id, "message before accept, dropped");
            },
            (_, PacketKind::Goodbye) => self.lose(id, "peer said goodbye"),
            (_, kind) => self.lose(id, &format!("unexpected {kind:?} packet")),
        }
    }

    fn expire_handshakes(&mut self) {
        let timeout = self.config.handshake_timeout;
        let now = self.now;

        self.peers.retain(|id, peer| {
            let stalled = peer.state == LinkState::Handshaking
                && now.saturating_sub(peer.accepted_at) > timeout;
            if stalled {
                tracing::debug!(client_id = %id, "handshake timed out");
                let _ = peer.stream.shutdown(Shutdown::Both);
            }
            !stalled
        });
    }

    /// Mark a peer's socket dead and queue its disconnect event.
    ///
    /// Peers the session never saw are dropped silently.
    fn lose(&mut self, id: ConnectionId, reason: &str) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.lost {
            return;
        }

        let _ = peer.stream.shutdown(Shutdown::Both);

        if peer.state == LinkState::Handshaking {
            tracing::debug!(client_id = %id, reason, "handshake aborted");
            self.peers.remove(&id);
            return;
        }

        tracing::debug!(client_id = %id, reason, "connection lost");
        peer.lost = true;
        self.events.push_back(Queued::Disconnected(id));
    }

    /// Queue a Reject packet and stop tracking the peer.
    fn close_with_code(&mut self, id: ConnectionId, code: u32) {
        let Some(mut peer) = self.peers.remove(&id) else {
            return;
        };

        if stream_io::queue_packet(&mut peer.outbound, &Packet::reject(code)).is_ok() {
            self.closing.push(Closing { stream: peer.stream, outbound: peer.outbound });
        }
    }

    fn flush_closing(&mut self) {
        self.closing.retain_mut(|closing| {
            let done = match stream_io::write_pending(&mut closing.stream, &mut closing.outbound) {
                Ok(()) => closing.outbound.is_empty(),
                Err(_) => true,
            };
            if done {
                let _ = closing.stream.shutdown(Shutdown::Both);
            }
            !done
        });
    }

    fn pending_peer(&mut self) -> Result<(ConnectionId, &mut Peer), TransportError> {
        let id = self.incoming.ok_or(TransportError::NoIncomingConnection)?;
        let peer = self.peers.get_mut(&id).ok_or(TransportError::NoIncomingConnection)?;

        if peer.state != LinkState::Visible(ConnectionState::Pending) {
            return Err(TransportError::NoIncomingConnection);
        }

        Ok((id, peer))
    }

    fn clear_context(&mut self) {
        self.incoming = None;
        self.disconnected = None;
        self.message = None;
    }
}

impl Default for TcpServerTransport {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl ServerTransport for TcpServerTransport {
    fn start(&mut self, protocol_name: &str, port: u16) -> Result<(), TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|e| TransportError::Start(format!("bind port {port}: {e}")))?;
        listener.set_nonblocking(true).map_err(|e| TransportError::Start(e.to_string()))?;

        self.listener = Some(listener);
        self.protocol_name = protocol_name.to_string();

        tracing::debug!(addr = ?self.local_addr(), "listening");

        Ok(())
    }

    fn stop(&mut self) {
        for peer in self.peers.values_mut() {
            if !peer.lost && matches!(peer.state, LinkState::Visible(s) if s.is_connected()) {
                let _ = stream_io::queue_packet(&mut peer.outbound, &Packet::goodbye());
                let _ = stream_io::write_pending(&mut peer.stream, &mut peer.outbound);
            }
            let _ = peer.stream.shutdown(Shutdown::Both);
        }

        self.listener = None;
        self.peers.clear();
        self.closing.clear();
        self.events.clear();
        self.pumped = false;
        self.clear_context();
    }

    fn add_time(&mut self, delta: Duration) {
        self.now += delta;
        self.pumped = false;
    }

    fn poll(&mut self) -> Result<Option<ServerTransportEvent>, TransportError> {
        if self.listener.is_none() {
            return Err(TransportError::NotStarted);
        }

        self.clear_context();

        if self.events.is_empty() && !self.pumped {
            self.pumped = true;
            self.pump();
        }

        while let Some(event) = self.events.pop_front() {
            match event {
                Queued::NewConnection(id) => {
                    // Rejected or timed out since it was queued
                    if !self.peers.contains_key(&id) {
                        continue;
                    }
                    self.incoming = Some(id);
                    return Ok(Some(ServerTransportEvent::NewConnection));
                },
                Queued::Disconnected(id) => {
                    let Some(peer) = self.peers.get_mut(&id) else {
                        continue;
                    };
                    peer.state = LinkState::Visible(ConnectionState::Disconnected);
                    self.disconnected = Some(id);
                    return Ok(Some(ServerTransportEvent::ClientDisconnected));
                },
                Queued::Message(info) => {
                    let live = info.sender.and_then(|id| self.peers.get(&id)).is_some_and(|p| {
                        matches!(p.state, LinkState::Visible(s) if s.is_connected())
                    });
                    if !live {
                        continue;
                    }
                    self.message = Some(info);
                    return Ok(Some(ServerTransportEvent::ClientMessageReceived));
                },
            }
        }

        Ok(None)
    }

    fn message_info(&self) -> Option<&MessageInfo> {
        self.message.as_ref()
    }

    fn incoming_connection(&self) -> Option<ConnectionId> {
        self.incoming
    }

    fn accept_incoming_connection(&mut self) -> Result<ConnectionId, TransportError> {
        let (id, peer) = self.pending_peer()?;

        stream_io::queue_packet(&mut peer.outbound, &Packet::accept())?;
        peer.state = LinkState::Visible(ConnectionState::Accepted);

        tracing::debug!(client_id = %id, addr = %peer.addr, "connection accepted");

        Ok(id)
    }

    fn reject_incoming_connection_with_code(&mut self, code: u32) -> Result<(), TransportError> {
        let (id, _) = self.pending_peer()?;

        self.close_with_code(id, code);
        tracing::debug!(client_id = %id, code, "connection rejected");

        Ok(())
    }

    fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        match self.peers.get(&id)?.state {
            LinkState::Handshaking => None,
            LinkState::Visible(state) => Some(state),
        }
    }

    fn connected_clients(&self) -> Vec<ConnectionId> {
        self.peers
            .iter()
            .filter(|(_, p)| matches!(p.state, LinkState::Visible(s) if s.is_connected()))
            .map(|(id, _)| *id)
            .collect()
    }

    fn disconnected_client(&self) -> Option<ConnectionId> {
        self.disconnected
    }

    fn destroy_connection(&mut self, id: ConnectionId) {
        if let Some(peer) = self.peers.remove(&id) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
    }

    fn send_to(
        &mut self,
        id: ConnectionId,
        channel: Channel,
        message: OutgoingMessage,
    ) -> Result<(), TransportError> {
        let config = &self.config;
        let peer = self.peers.get_mut(&id).ok_or(TransportError::UnknownConnection(id))?;

        if !matches!(peer.state, LinkState::Visible(s) if s.is_connected()) {
            return Err(TransportError::UnknownConnection(id));
        }

        // Disconnect already queued; the message has nowhere to go
        if peer.lost {
            return Ok(());
        }

        match stream_io::enqueue_message(config, &mut peer.outbound, channel, message) {
            Ok(Enqueued::Queued) => Ok(()),
            Ok(Enqueued::Dropped) => {
                let queued = peer.outbound.len();
                tracing::warn!(client_id = %id, queued, "unreliable message dropped");
                Ok(())
            },
            Err(err) => {
                self.lose(id, "outbound queue full");
                Err(err)
            },
        }
    }

    fn send_packets(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() {
            return Err(TransportError::NotStarted);
        }

        let ids: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };
            if peer.lost {
                continue;
            }

            match stream_io::write_pending(&mut peer.stream, &mut peer.outbound) {
                Ok(()) => {
                    if peer.outbound.is_empty()
                        && peer.state == LinkState::Visible(ConnectionState::Accepted)
                    {
                        peer.state = LinkState::Visible(ConnectionState::Established);
                    }
                },
                Err(err) => self.lose(id, &format!("write failed: {err}")),
            }
        }

        self.flush_closing();

        Ok(())
    }
}

fn prepare_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)
}
