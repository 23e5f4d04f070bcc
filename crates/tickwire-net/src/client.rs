//! Client half of the TCP transport.

use std::{
    collections::VecDeque,
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use bytes::BytesMut;
use tickwire_core::{
    Channel, ClientTransport, ClientTransportEvent, MessageInfo, OutgoingMessage, TransportError,
    is_readable,
};
use tickwire_proto::{Packet, PacketKind};

use crate::{
    config::TcpConfig,
    io::{self as stream_io, Enqueued, ReadOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    /// Hello sent, waiting for Accept or Reject
    Handshaking,
    Connected,
    Closed,
}

#[derive(Debug)]
enum Queued {
    Connected,
    Disconnected,
    Message(MessageInfo),
}

/// TCP implementation of [`ClientTransport`].
#[derive(Debug)]
pub struct TcpClientTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    link: Link,
    inbound: BytesMut,
    outbound: BytesMut,
    events: VecDeque<Queued>,
    pumped: bool,
    message: Option<MessageInfo>,
    close_code: Option<u32>,
}

impl TcpClientTransport {
    /// Create an idle transport.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            link: Link::Idle,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            events: VecDeque::new(),
            pumped: false,
            message: None,
            close_code: None,
        }
    }

    /// Local address of the socket. `None` when not started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn pump(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if matches!(self.link, Link::Idle | Link::Closed) {
            return;
        }

        let outcome = stream_io::read_available(stream, &mut self.inbound);

        while matches!(self.link, Link::Handshaking | Link::Connected) {
            match Packet::decode_from(&mut self.inbound) {
                Ok(Some(packet)) => self.handle_packet(&packet),
                Ok(None) => break,
                Err(err) => {
                    self.close(&format!("malformed packet: {err}"));
                    return;
                },
            }
        }

        match outcome {
            Ok(ReadOutcome::Open) => {},
            Ok(ReadOutcome::Eof) => self.close("server closed the connection"),
            Err(err) => self.close(&format!("read failed: {err}")),
        }
    }

    fn handle_packet(&mut self, packet: &Packet) {
        let Ok(kind) = packet.kind() else {
            self.close("unknown packet kind");
            return;
        };

        match (self.link, kind) {
            (Link::Handshaking, PacketKind::Accept) => {
                self.link = Link::Connected;
                self.events.push_back(Queued::Connected);
            },
            (Link::Connected, PacketKind::Message) => {
                if !is_readable(packet.header.message_type(), packet.payload.len()) {
                    self.close("invalid message");
                    return;
                }
                self.events.push_back(Queued::Message(MessageInfo {
                    sender: None,
                    message_type: packet.header.message_type(),
                    payload: packet.payload.clone(),
                }));
            },
            (_, PacketKind::Reject) => {
                self.close_code = Some(packet.header.code());
                self.close("server closed the connection with a code");
            },
            (_, PacketKind::Goodbye) => self.close("server said goodbye"),
            (_, kind) => self.close(&format!("unexpected {kind:?} packet")),
        }
    }

    /// Mark the link closed and queue the disconnect event.
    fn close(&mut self, reason: &str) {
        if matches!(self.link, Link::Idle | Link::Closed) {
            return;
        }

        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }

        tracing::debug!(reason, code = ?self.close_code, "link closed");

        self.link = Link::Closed;
        self.outbound.clear();
        self.events.push_back(Queued::Disconnected);
    }
}

impl Default for TcpClientTransport {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl ClientTransport for TcpClientTransport {
    fn start(&mut self, protocol_name: &str, host: &str, port: u16) -> Result<(), TransportError> {
        let mut stream = TcpStream::connect((host, port))
            .map_err(|e| TransportError::Start(format!("connect {host}:{port}: {e}")))?;
        stream.set_nonblocking(true).map_err(|e| TransportError::Start(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| TransportError::Start(e.to_string()))?;

        self.inbound.clear();
        self.outbound.clear();
        self.events.clear();
        self.close_code = None;
        self.message = None;

        stream_io::queue_packet(&mut self.outbound, &Packet::hello(protocol_name))?;
        stream_io::write_pending(&mut stream, &mut self.outbound)
            .map_err(|e| TransportError::Start(format!("send hello: {e}")))?;

        self.stream = Some(stream);
        self.link = Link::Handshaking;

        tracing::debug!(%host, port, protocol = protocol_name, "hello sent");

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.link = Link::Idle;
        self.inbound.clear();
        self.outbound.clear();
        self.events.clear();
        self.pumped = false;
        self.message = None;
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotStarted)?;

        if matches!(self.link, Link::Handshaking | Link::Connected) {
            stream_io::queue_packet(&mut self.outbound, &Packet::goodbye())?;
            stream_io::write_pending(stream, &mut self.outbound)?;
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.link = Link::Closed;
        self.outbound.clear();

        Ok(())
    }

    fn add_time(&mut self, _delta: Duration) {
        self.pumped = false;
    }

    fn poll(&mut self) -> Result<Option<ClientTransportEvent>, TransportError> {
        if self.link == Link::Idle {
            return Err(TransportError::NotStarted);
        }

        self.message = None;

        if self.events.is_empty() && !self.pumped {
            self.pumped = true;
            self.pump();
        }

        let event = match self.events.pop_front() {
            None => return Ok(None),
            Some(Queued::Connected) => ClientTransportEvent::Connected,
            Some(Queued::Disconnected) => ClientTransportEvent::Disconnected,
            Some(Queued::Message(info)) => {
                self.message = Some(info);
                ClientTransportEvent::MessageReceived
            },
        };

        Ok(Some(event))
    }

    fn message_info(&self) -> Option<&MessageInfo> {
        self.message.as_ref()
    }

    fn send(&mut self, channel: Channel, message: OutgoingMessage) -> Result<(), TransportError> {
        if self.link != Link::Connected {
            return Err(TransportError::NotConnected);
        }

        match stream_io::enqueue_message(&self.config, &mut self.outbound, channel, message) {
            Ok(Enqueued::Queued) => Ok(()),
            Ok(Enqueued::Dropped) => {
                tracing::warn!(queued = self.outbound.len(), "unreliable message dropped");
                Ok(())
            },
            Err(err) => {
                self.close("outbound queue full");
                Err(err)
            },
        }
    }

    fn send_packets(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotStarted)?;

        if !matches!(self.link, Link::Handshaking | Link::Connected) {
            return Ok(());
        }

        if let Err(err) = stream_io::write_pending(stream, &mut self.outbound) {
            self.close(&format!("write failed: {err}"));
        }

        Ok(())
    }

    fn server_close_code(&self) -> Option<u32> {
        self.close_code
    }
}
