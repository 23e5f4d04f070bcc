//! Server-side session core and event dispatcher.
//!
//! [`Server`] owns three pieces of state: the identity table of accepted
//! clients, the slot for the one connection request awaiting an answer, and
//! the slot for the last disconnected client. The caller drives it once per
//! tick from a single thread:
//!
//! ```text
//! add_time ──> poll until None ──> read / send ──> flush
//! ```
//!
//! # Admission
//!
//! The identity table holds at most [`ServerConfig::max_clients`] entries.
//! [`Server::accept_incoming`] refuses to grow it past that; the usual path is
//! [`Server::admit_incoming`], which rejects with [`ServerConfig::busy_code`]
//! once the table is full. A request that is neither accepted nor rejected
//! before the next [`Server::poll`] is rejected with
//! [`ServerConfig::unanswered_code`].

use std::{collections::BTreeSet, time::Duration};

use crate::{
    error::SessionError,
    event::ServerEvent,
    message::{self, Message},
    transport::{Channel, ConnectionId, ServerTransport, ServerTransportEvent, TransportError},
};

/// Protocol name used when none is configured.
pub const DEFAULT_PROTOCOL_NAME: &str = "tickwire";

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 42042;

/// Rejection code telling a peer the server has no free slot.
pub const DEFAULT_BUSY_CODE: u32 = 42;

/// Rejection code for requests left unanswered for a whole poll cycle.
pub const DEFAULT_UNANSWERED_CODE: u32 = 43;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Protocol name peers must present
    pub protocol_name: String,
    /// Port to listen on
    pub port: u16,
    /// Capacity of the identity table
    pub max_clients: usize,
    /// Code sent by [`Server::admit_incoming`] when the table is full
    pub busy_code: u32,
    /// Code sent when a request is left unanswered until the next poll
    pub unanswered_code: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol_name: DEFAULT_PROTOCOL_NAME.to_string(),
            port: DEFAULT_PORT,
            max_clients: 1,
            busy_code: DEFAULT_BUSY_CODE,
            unanswered_code: DEFAULT_UNANSWERED_CODE,
        }
    }
}

/// Outcome of [`Server::admit_incoming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was accepted and the client added to the identity table.
    Accepted(ConnectionId),
    /// The table was full; the request was rejected with the busy code.
    Rejected(ConnectionId),
}

/// Server session.
///
/// Generic over the transport so the same logic runs over real sockets and
/// over the deterministic loopback double.
pub struct Server<T: ServerTransport> {
    transport: T,
    config: ServerConfig,
    running: bool,
    /// Connection request awaiting accept or reject
    pending: Option<ConnectionId>,
    /// Identity table of accepted clients
    clients: BTreeSet<ConnectionId>,
    last_disconnected: Option<ConnectionId>,
    /// Set by a message event, cleared by the next poll
    message_ready: bool,
}

impl<T: ServerTransport> Server<T> {
    /// Create a stopped server over `transport`.
    pub fn new(transport: T, config: ServerConfig) -> Self {
        Self {
            transport,
            config,
            running: false,
            pending: None,
            clients: BTreeSet::new(),
            last_disconnected: None,
            message_ready: false,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
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

    /// True between a successful [`Server::start`] and [`Server::stop`].
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start listening.
    ///
    /// On failure the transport is stopped again before returning, so no
    /// half-started state is left behind.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyStarted` if already running
    /// - `SessionError::StartFailed` if the transport cannot listen
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.running {
            return Err(SessionError::AlreadyStarted);
        }

        if let Err(err) = self.transport.start(&self.config.protocol_name, self.config.port) {
            self.transport.stop();
            tracing::error!(error = %err, port = self.config.port, "failed to start server");
            return Err(SessionError::StartFailed(err));
        }

        self.running = true;
        self.reset();

        tracing::info!(
            protocol = %self.config.protocol_name,
            port = self.config.port,
            max_clients = self.config.max_clients,
            "server started"
        );

        Ok(())
    }

    /// Stop the server and release every connection. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.transport.stop();
        self.running = false;
        self.reset();

        tracing::info!("server stopped");
    }

    /// Advance the transport clock. Call once per tick before polling.
    pub fn add_time(&mut self, delta: Duration) {
        self.transport.add_time(delta);
    }

    /// Next server event, or `None` once the queue is drained for this tick.
    ///
    /// Call in a loop until `None`, before [`Server::flush`]. Anything read
    /// through the accessors after an event is only valid until the next call.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotStarted` if not running
    /// - `SessionError::Reject` if an unanswered request could not be rejected
    /// - `SessionError::Poll` on any transport error (fatal)
    pub fn poll(&mut self) -> Result<Option<ServerEvent>, SessionError> {
        self.ensure_running()?;

        self.message_ready = false;
        self.expire_unanswered_request()?;

        let Some(event) = self.transport.poll().map_err(SessionError::Poll)? else {
            return Ok(None);
        };

        let event = match event {
            ServerTransportEvent::NewConnection => {
                let id = self
                    .transport
                    .incoming_connection()
                    .ok_or(SessionError::Poll(TransportError::NoIncomingConnection))?;

                tracing::debug!(client_id = %id, "connection requested");
                self.pending = Some(id);
                ServerEvent::ConnectionRequest
            },
            ServerTransportEvent::ClientDisconnected => {
                let id = self.transport.disconnected_client().ok_or_else(|| {
                    SessionError::Poll(TransportError::Protocol(
                        "disconnect event without a disconnected client".to_string(),
                    ))
                })?;

                self.handle_disconnect(id);
                ServerEvent::ClientDisconnected
            },
            ServerTransportEvent::ClientMessageReceived => {
                self.message_ready = true;
                ServerEvent::MessageReceived
            },
        };

        Ok(Some(event))
    }

    /// Accept the pending connection request and return its ID.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoPendingConnection` if no request is waiting, or it
    ///   was already answered
    /// - `SessionError::CapacityReached` if the identity table is full
    /// - `SessionError::Accept` if the transport fails
    pub fn accept_incoming(&mut self) -> Result<ConnectionId, SessionError> {
        self.ensure_running()?;

        let id = self.pending.ok_or(SessionError::NoPendingConnection)?;

        if self.clients.len() >= self.config.max_clients {
            return Err(SessionError::CapacityReached { max_clients: self.config.max_clients });
        }

        let accepted = self.transport.accept_incoming_connection().map_err(SessionError::Accept)?;
        debug_assert_eq!(accepted, id);

        self.pending = None;
        self.clients.insert(accepted);

        tracing::info!(client_id = %accepted, clients = self.clients.len(), "client accepted");

        Ok(accepted)
    }

    /// Reject the pending connection request with `code` and return its ID.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoPendingConnection` if no request is waiting, or it
    ///   was already answered
    /// - `SessionError::Reject` if the transport fails
    pub fn reject_incoming(&mut self, code: u32) -> Result<ConnectionId, SessionError> {
        self.ensure_running()?;

        let id = self.pending.ok_or(SessionError::NoPendingConnection)?;

        self.transport.reject_incoming_connection_with_code(code).map_err(SessionError::Reject)?;
        self.pending = None;

        tracing::info!(client_id = %id, code, "connection rejected");

        Ok(id)
    }

    /// Answer the pending request according to the admission policy: accept
    /// while the identity table has room, otherwise reject with the busy code.
    ///
    /// # Errors
    ///
    /// Same as [`Server::accept_incoming`] and [`Server::reject_incoming`].
    pub fn admit_incoming(&mut self) -> Result<Admission, SessionError> {
        if self.clients.len() < self.config.max_clients {
            self.accept_incoming().map(Admission::Accepted)
        } else {
            let code = self.config.busy_code;
            self.reject_incoming(code).map(Admission::Rejected)
        }
    }

    /// Enqueue `bytes` reliably for client `id`.
    ///
    /// # Errors
    ///
    /// - `SessionError::MessageTooLarge` before any transport call
    /// - `SessionError::UnknownClient` for a stale or unknown ID
    /// - `SessionError::Send` if the transport refuses the message
    pub fn send_reliable_to(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), SessionError> {
        self.send_to(id, Channel::Reliable, bytes)
    }

    /// Enqueue `bytes` unreliably for client `id`.
    ///
    /// # Errors
    ///
    /// Same as [`Server::send_reliable_to`].
    pub fn send_unreliable_to(
        &mut self,
        id: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        self.send_to(id, Channel::Unreliable, bytes)
    }

    /// Enqueue `bytes` reliably for every connected client. Returns how many
    /// messages were enqueued.
    ///
    /// # Errors
    ///
    /// - `SessionError::MessageTooLarge` before any transport call
    /// - `SessionError::PartialBroadcast` if the transport refused some
    ///   peers. Every other peer still has the message enqueued.
    pub fn broadcast_reliable(&mut self, bytes: &[u8]) -> Result<usize, SessionError> {
        self.broadcast(Channel::Reliable, bytes)
    }

    /// Enqueue `bytes` unreliably for every connected client. Returns how many
    /// messages were enqueued.
    ///
    /// # Errors
    ///
    /// Same as [`Server::broadcast_reliable`].
    pub fn broadcast_unreliable(&mut self, bytes: &[u8]) -> Result<usize, SessionError> {
        self.broadcast(Channel::Unreliable, bytes)
    }

    /// Pack every enqueued message into packets and send them. Call exactly
    /// once per tick, after all sends.
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
    /// Only valid between a [`ServerEvent::MessageReceived`] and the next
    /// [`Server::poll`].
    ///
    /// # Errors
    ///
    /// - `SessionError::NoMessageAvailable` outside that window
    /// - `SessionError::UnexpectedMessageType` for a foreign message type
    pub fn read_received_message(&self, dst: &mut Message) -> Result<(), SessionError> {
        if !self.message_ready {
            return Err(SessionError::NoMessageAvailable);
        }

        let info = self.transport.message_info().ok_or(SessionError::NoMessageAvailable)?;
        message::read_message(info, dst)
    }

    /// ID of the last client that disconnected.
    pub fn disconnected_client_id(&self) -> Option<ConnectionId> {
        self.last_disconnected
    }

    /// Connection request awaiting an answer, if any.
    pub fn pending_connection(&self) -> Option<ConnectionId> {
        self.pending
    }

    /// Accepted clients, in ID order.
    pub fn clients(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.clients.iter().copied()
    }

    /// Number of accepted clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// True if `id` is in the identity table.
    pub fn is_client(&self, id: ConnectionId) -> bool {
        self.clients.contains(&id)
    }

    fn send_to(
        &mut self,
        id: ConnectionId,
        channel: Channel,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        self.ensure_running()?;

        let message = message::create_outgoing_message(bytes)?;

        if !self.clients.contains(&id) || !self.transport.find_client(id) {
            tracing::error!(client_id = %id, "send to unknown client");
            return Err(SessionError::UnknownClient(id));
        }

        self.transport.send_to(id, channel, message).map_err(SessionError::Send)
    }

    fn broadcast(&mut self, channel: Channel, bytes: &[u8]) -> Result<usize, SessionError> {
        self.ensure_running()?;
        message::validate_length(bytes.len())?;

        let peers = self.transport.connected_clients();
        let mut enqueued = 0;
        let mut refused = 0;
        let mut first_refusal = None;

        for id in peers {
            let message = message::create_outgoing_message(bytes)?;
            match self.transport.send_to(id, channel, message) {
                Ok(()) => enqueued += 1,
                Err(err) => {
                    tracing::warn!(client_id = %id, %err, "broadcast refused by transport");
                    refused += 1;
                    first_refusal.get_or_insert(err);
                },
            }
        }

        tracing::trace!(enqueued, ?channel, len = bytes.len(), "broadcast enqueued");

        match first_refusal {
            None => Ok(enqueued),
            Some(source) => Err(SessionError::PartialBroadcast { enqueued, refused, source }),
        }
    }

    fn expire_unanswered_request(&mut self) -> Result<(), SessionError> {
        let Some(id) = self.pending.take() else {
            return Ok(());
        };

        let code = self.config.unanswered_code;
        tracing::warn!(client_id = %id, code, "connection request left unanswered, rejecting");

        self.transport.reject_incoming_connection_with_code(code).map_err(SessionError::Reject)
    }

    fn handle_disconnect(&mut self, id: ConnectionId) {
        self.last_disconnected = Some(id);

        let was_client = self.clients.remove(&id);
        if self.pending == Some(id) {
            self.pending = None;
        }

        self.transport.destroy_connection(id);

        tracing::info!(client_id = %id, was_client, "client disconnected");
    }

    fn reset(&mut self) {
        self.pending = None;
        self.clients.clear();
        self.last_disconnected = None;
        self.message_ready = false;
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.running { Ok(()) } else { Err(SessionError::NotStarted) }
    }
}
