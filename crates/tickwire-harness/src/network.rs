//! Shared in-memory network state.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tickwire_core::{Channel, ConnectionId};

use crate::{sim_client::SimClientTransport, sim_server::SimServerTransport};

/// Packet moving through the loopback network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimPacket {
    /// Connection request.
    Hello {
        /// Protocol name the client speaks
        protocol_name: String,
    },
    /// Server accepted the connection.
    Accept,
    /// Server rejected or closed the connection.
    Reject {
        /// Reason code
        code: u32,
    },
    /// Application message.
    Message {
        /// Delivery channel
        channel: Channel,
        /// Message type tag
        message_type: u8,
        /// Payload bytes
        payload: Bytes,
    },
    /// Graceful close.
    Goodbye,
}

/// Record of one message the server handed to its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination connection
    pub to: ConnectionId,
    /// Requested channel
    pub channel: Channel,
    /// Payload exactly as the transport received it
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub(crate) struct ServerEndpoint {
    pub(crate) protocol_name: String,
    pub(crate) inbox: VecDeque<(ConnectionId, SimPacket)>,
    pub(crate) injected_errors: VecDeque<String>,
    pub(crate) fail_next_flush: bool,
    pub(crate) sent: Vec<SentMessage>,
    next_id: u32,
}

pub(crate) struct NetworkState {
    rng: ChaCha8Rng,
    loss_rate: f64,
    pub(crate) servers: BTreeMap<u16, ServerEndpoint>,
    pub(crate) client_inboxes: BTreeMap<(u16, ConnectionId), VecDeque<SimPacket>>,
}

impl NetworkState {
    /// Roll the dice for an unreliable packet. Reliable packets always pass.
    pub(crate) fn should_drop(&mut self, channel: Channel) -> bool {
        !channel.is_reliable() && self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate)
    }

    /// Register a new client link with the server on `port`.
    pub(crate) fn open_link(&mut self, port: u16) -> Option<ConnectionId> {
        let server = self.servers.get_mut(&port)?;
        server.next_id += 1;
        let id = ConnectionId(server.next_id);

        self.client_inboxes.insert((port, id), VecDeque::new());
        Some(id)
    }

    /// Deliver a packet to a server inbox, if the server is still listening.
    pub(crate) fn deliver_to_server(&mut self, port: u16, from: ConnectionId, packet: SimPacket) {
        if let Some(server) = self.servers.get_mut(&port) {
            server.inbox.push_back((from, packet));
        }
    }

    /// Deliver a packet to a client inbox, if the client is still around.
    pub(crate) fn deliver_to_client(&mut self, port: u16, to: ConnectionId, packet: SimPacket) {
        if let Some(inbox) = self.client_inboxes.get_mut(&(port, to)) {
            inbox.push_back(packet);
        }
    }
}

/// Handle to a loopback network. Clones share the same network.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimNetwork {
    /// Lossless network seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                loss_rate: 0.0,
                servers: BTreeMap::new(),
                client_inboxes: BTreeMap::new(),
            })),
        }
    }

    /// Drop unreliable packets with probability `rate`.
    ///
    /// Rates outside `[0.0, 1.0]` are clamped.
    #[must_use]
    pub fn with_unreliable_loss(self, rate: f64) -> Self {
        self.lock().loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// New server transport attached to this network.
    pub fn server(&self) -> SimServerTransport {
        SimServerTransport::new(self.clone())
    }

    /// New client transport attached to this network.
    pub fn client(&self) -> SimClientTransport {
        SimClientTransport::new(self.clone())
    }

    /// Deliver `packet` to the server on `port` as if client `from` sent it.
    pub fn inject_to_server(&self, port: u16, from: ConnectionId, packet: SimPacket) {
        self.lock().deliver_to_server(port, from, packet);
    }

    /// Make the next poll of the server on `port` fail with `reason`.
    pub fn inject_server_error(&self, port: u16, reason: impl Into<String>) {
        if let Some(server) = self.lock().servers.get_mut(&port) {
            server.injected_errors.push_back(reason.into());
        }
    }

    /// Make the next `send_packets` of the server on `port` fail.
    pub fn fail_next_flush(&self, port: u16) {
        if let Some(server) = self.lock().servers.get_mut(&port) {
            server.fail_next_flush = true;
        }
    }

    /// Every message the server on `port` enqueued, in order.
    pub fn sent_messages(&self, port: u16) -> Vec<SentMessage> {
        self.lock().servers.get(&port).map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Packets waiting in the server inbox on `port`.
    pub fn server_backlog(&self, port: u16) -> usize {
        self.lock().servers.get(&port).map_or(0, |s| s.inbox.len())
    }

    /// True if a server is listening on `port`.
    pub fn is_listening(&self, port: u16) -> bool {
        self.lock().servers.contains_key(&port)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn listen(&self, port: u16, protocol_name: &str) -> bool {
        let mut state = self.lock();
        if state.servers.contains_key(&port) {
            return false;
        }

        state.servers.insert(port, ServerEndpoint {
            protocol_name: protocol_name.to_string(),
            ..ServerEndpoint::default()
        });
        true
    }

    pub(crate) fn unlisten(&self, port: u16) {
        self.lock().servers.remove(&port);
    }
}
