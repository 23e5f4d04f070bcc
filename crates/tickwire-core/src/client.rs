//! Client-side session core and event dispatcher.
//!
//! A [`Client`] holds a single link to a server. It is connected between a
//! [`ClientEvent::Connected`] and the next [`ClientEvent::Disconnected`];
//! sends outside that interval fail with [`SessionError::NotConnected`].

use std::time::Duration;

use crate::{
    error::SessionError,
    event::ClientEvent,
    message::{self, Message},
    server::{DEFAULT_PORT, DEFAULT_PROTOCOL_NAME},
    transport::{Channel, ClientTransport, ClientTransportEvent},
};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Protocol name presented to the server
    pub protocol_name: String,
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_name: DEFAULT_PROTOCOL_NAME.to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Client session.
pub struct Client<T: ClientTransport> {
    transport: T,
    config: ClientConfig,
    running: bool,
    connected: bool,
    message_ready: bool,
}

impl<T: ClientTransport> Client<T> {
    /// Create a stopped client over `transport`.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config, running: false, connected: false, message_ready: false }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// True between a successful [`Client::start`] and [`Client::stop`].
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True once the server accepted us and until the link goes away.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Code the server sent when it rejected or closed the link.
    pub fn server_close_code(&self) -> Option<u32> {
        self.transport.server_close_code()
    }

    /// Start connecting to the configured server.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyStarted` if already running
    /// - `SessionError::StartFailed` if the transport cannot start
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.running {
            return Err(SessionError::AlreadyStarted);
        }

        let ClientConfig { protocol_name, host, port } = &self.config;
        if let Err(err) = self.transport.start(protocol_name, host, *port) {
            self.transport.stop();
            tracing::error!(error = %err, %host, port, "failed to start client");
            return Err(SessionError::StartFailed(err));
        }

        self.running = true;
        self.connected = false;
        self.message_ready = false;

        tracing::info!(protocol = %protocol_name, %host, port, "client started");

        Ok(())
    }

    /// Tear down the link and release memory. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.transport.stop();
        self.running = false;
        self.connected = false;
        self.message_ready = false;

        tracing::info!("client stopped");
    }

    /// Gracefully close the link. The client is not connected afterwards,
    /// unless the transport failed to close it.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotStarted` if not running
    /// - `SessionError::Disconnect` if the transport fails
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.ensure_running()?;

        self.transport.disconnect().map_err(SessionError::Disconnect)?;
        self.connected = false;

        tracing::info!("disconnected from server");

        Ok(())
    }

    /// Advance the transport clock. Call once per tick before polling.
    pub fn add_time(&mut self, delta: Duration) {
        self.transport.add_time(delta);
    }

    /// Next client event, or `None` once the queue is drained for this tick.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotStarted` if not running
    /// - `SessionError::Poll` on any transport error (fatal)
    pub fn poll(&mut self) -> Result<Option<ClientEvent>, SessionError> {
        self.ensure_running()?;

        self.message_ready = false;

        let Some(event) = self.transport.poll().map_err(SessionError::Poll)? else {
            return Ok(None);
        };

        let event = match event {
            ClientTransportEvent::Connected => {
                self.connected = true;
                tracing::info!("connected to server");
                ClientEvent::Connected
            },
            ClientTransportEvent::Disconnected => {
                self.connected = false;
                let code = self.transport.server_close_code();
                tracing::info!(?code, "disconnected from server");
                ClientEvent::Disconnected
            },
            ClientTransportEvent::MessageReceived => {
                self.message_ready = true;
                ClientEvent::MessageReceived
            },
        };

        Ok(Some(event))
    }

    /// Enqueue `bytes` reliably for the server.
    ///
    /// # Errors
    ///
    /// - `SessionError::MessageTooLarge` before any transport call
    /// - `SessionError::NotConnected` if not connected
    /// - `SessionError::Send` if the transport refuses the message
    pub fn send_reliable(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.send(Channel::Reliable, bytes)
    }

    /// Enqueue `bytes` unreliably for the server.
    ///
    /// # Errors
    ///
    /// Same as [`Client::send_reliable`].
    pub fn send_unreliable(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.send(Channel::Unreliable, bytes)
    }

    /// Transmit every enqueued message. Call exactly once per tick.
    ///
    /// # Errors
    ///
    /// - `SessionError::Flush` if the transport fails (recoverable)
    pub fn flush(&mut self) -> Result<(), SessionError> {
        self.ensure_running()?;
        self.transport.send_packets().map_err(SessionError::Flush)
    }

    /// Copy the last received message into `dst`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoMessageAvailable` outside the window after a
    ///   [`ClientEvent::MessageReceived`]
    /// - `SessionError::UnexpectedMessageType` for a foreign message type
    pub fn read_received_message(&self, dst: &mut Message) -> Result<(), SessionError> {
        if !self.message_ready {
            return Err(SessionError::NoMessageAvailable);
        }

        let info = self.transport.message_info().ok_or(SessionError::NoMessageAvailable)?;
        message::read_message(info, dst)
    }

    fn send(&mut self, channel: Channel, bytes: &[u8]) -> Result<(), SessionError> {
        self.ensure_running()?;

        let message = message::create_outgoing_message(bytes)?;

        if !self.connected {
            return Err(SessionError::NotConnected);
        }

        self.transport.send(channel, message).map_err(SessionError::Send)
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.running { Ok(()) } else { Err(SessionError::NotStarted) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use bytes::Bytes;

    use super::*;
    use crate::{
        message::{BYTE_ARRAY_MESSAGE_TYPE, OutgoingMessage},
        transport::{MessageInfo, TransportError},
    };

    #[derive(Default)]
    struct ScriptedTransport {
        script: VecDeque<Result<ClientTransportEvent, TransportError>>,
        inbound: VecDeque<MessageInfo>,
        message: Option<MessageInfo>,
        close_code: Option<u32>,
        sent: Vec<(Channel, OutgoingMessage)>,
        disconnects: usize,
        fail_disconnect: bool,
    }

    impl ClientTransport for ScriptedTransport {
        fn start(&mut self, _: &str, _: &str, _: u16) -> Result<(), TransportError> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn disconnect(&mut self) -> Result<(), TransportError> {
            if self.fail_disconnect {
                return Err(TransportError::Io("broken pipe".to_string()));
            }
            self.disconnects += 1;
            Ok(())
        }

        fn add_time(&mut self, _: Duration) {}

        fn poll(&mut self) -> Result<Option<ClientTransportEvent>, TransportError> {
            self.message = None;
            let Some(step) = self.script.pop_front() else {
                return Ok(None);
            };
            if let Ok(ClientTransportEvent::MessageReceived) = step {
                self.message = self.inbound.pop_front();
            }
            step.map(Some)
        }

        fn message_info(&self) -> Option<&MessageInfo> {
            self.message.as_ref()
        }

        fn send(&mut self, channel: Channel, message: OutgoingMessage) -> Result<(), TransportError> {
            self.sent.push((channel, message));
            Ok(())
        }

        fn send_packets(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn server_close_code(&self) -> Option<u32> {
            self.close_code
        }
    }

    fn started(script: Vec<Result<ClientTransportEvent, TransportError>>) -> Client<ScriptedTransport> {
        let transport = ScriptedTransport { script: script.into(), ..Default::default() };
        let mut client = Client::new(transport, ClientConfig::default());
        client.start().unwrap();
        client
    }

    #[test]
    fn send_before_connect_is_refused() {
        let mut client = started(vec![]);

        assert_eq!(client.send_reliable(b"early"), Err(SessionError::NotConnected));
        assert!(client.transport().sent.is_empty());
    }

    #[test]
    fn connected_event_enables_sends() {
        let mut client = started(vec![Ok(ClientTransportEvent::Connected)]);

        assert_eq!(client.poll(), Ok(Some(ClientEvent::Connected)));
        assert!(client.is_connected());

        client.send_unreliable(b"hello").unwrap();
        client.send_reliable(b"world").unwrap();

        let channels: Vec<_> = client.transport().sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![Channel::Unreliable, Channel::Reliable]);
    }

    #[test]
    fn rejection_exposes_close_code() {
        let mut client = started(vec![Ok(ClientTransportEvent::Disconnected)]);
        client.transport_mut().close_code = Some(42);

        assert_eq!(client.poll(), Ok(Some(ClientEvent::Disconnected)));
        assert!(!client.is_connected());
        assert_eq!(client.server_close_code(), Some(42));
    }

    #[test]
    fn oversized_send_fails_before_connection_check() {
        let mut client = started(vec![]);
        let big = vec![0u8; crate::MAX_MESSAGE_SIZE + 1];

        assert!(matches!(client.send_reliable(&big), Err(SessionError::MessageTooLarge { .. })));
    }

    #[test]
    fn message_window_closes_on_next_poll() {
        let mut client = started(vec![
            Ok(ClientTransportEvent::Connected),
            Ok(ClientTransportEvent::MessageReceived),
        ]);
        client.transport_mut().inbound.push_back(MessageInfo {
            sender: None,
            message_type: BYTE_ARRAY_MESSAGE_TYPE,
            payload: Bytes::from_static(b"pong"),
        });

        let mut msg = Message::new();
        client.poll().unwrap();
        assert_eq!(client.poll(), Ok(Some(ClientEvent::MessageReceived)));
        client.read_received_message(&mut msg).unwrap();
        assert_eq!(msg.bytes(), b"pong");

        assert_eq!(client.poll(), Ok(None));
        assert_eq!(client.read_received_message(&mut msg), Err(SessionError::NoMessageAvailable));
    }

    #[test]
    fn disconnect_drops_connected_state() {
        let mut client = started(vec![Ok(ClientTransportEvent::Connected)]);
        client.poll().unwrap();

        client.disconnect().unwrap();

        assert!(!client.is_connected());
        assert_eq!(client.transport().disconnects, 1);
        assert_eq!(client.send_reliable(b"late"), Err(SessionError::NotConnected));
    }

    #[test]
    fn failed_disconnect_keeps_connected_state() {
        let mut client = started(vec![Ok(ClientTransportEvent::Connected)]);
        client.poll().unwrap();
        client.transport.fail_disconnect = true;

        let err = client.disconnect().unwrap_err();
        assert!(matches!(err, SessionError::Disconnect(_)));
        assert!(client.is_connected());
        assert_eq!(client.transport().disconnects, 0);
    }

    #[test]
    fn poll_error_is_fatal() {
        let mut client = started(vec![Err(TransportError::Io("reset".to_string()))]);

        let err = client.poll().unwrap_err();
        assert!(matches!(err, SessionError::Poll(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn operations_require_start() {
        let transport = ScriptedTransport::default();
        let mut client = Client::new(transport, ClientConfig::default());

        assert_eq!(client.poll(), Err(SessionError::NotStarted));
        assert_eq!(client.flush(), Err(SessionError::NotStarted));
        assert_eq!(client.disconnect(), Err(SessionError::NotStarted));
    }
}
