//! One server and any number of clients on a shared loopback network.
//!
//! Drives the real session objects tick by tick and records what each side
//! observed, so tests can assert on outcomes rather than script every poll.

use std::time::Duration;

use tickwire_core::{
    Client, ClientConfig, ClientEvent, ConnectionId, Message, Server, ServerConfig, ServerEvent,
    SessionError,
};

use crate::{SimClientTransport, SimNetwork, SimServerTransport};

/// Tick length used by [`SimCluster`] (60 Hz).
pub const TICK: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Simulated server plus clients.
pub struct SimCluster {
    /// Shared network, for fault injection and inspection
    pub network: SimNetwork,
    /// Server session
    pub server: Server<SimServerTransport>,
    /// Client sessions, in creation order
    pub clients: Vec<Client<SimClientTransport>>,
    /// Answer connection requests with `admit_incoming` during
    /// [`SimCluster::tick_server`]. Off means requests are left to the test.
    pub auto_admit: bool,
    /// Every server event, in order
    pub server_events: Vec<ServerEvent>,
    /// Every message the server read, with its sender
    pub server_inbox: Vec<(ConnectionId, Vec<u8>)>,
    /// Every event per client
    pub client_events: Vec<Vec<ClientEvent>>,
    /// Every message per client
    pub client_inboxes: Vec<Vec<Vec<u8>>>,
}

impl SimCluster {
    /// Start a server on a fresh network seeded with `seed`.
    pub fn new(seed: u64, config: ServerConfig) -> Result<Self, SessionError> {
        Self::with_network(SimNetwork::new(seed), config)
    }

    /// Start a server on an existing network.
    pub fn with_network(network: SimNetwork, config: ServerConfig) -> Result<Self, SessionError> {
        let mut server = Server::new(network.server(), config);
        server.start()?;

        Ok(Self {
            network,
            server,
            clients: Vec::new(),
            auto_admit: true,
            server_events: Vec::new(),
            server_inbox: Vec::new(),
            client_events: Vec::new(),
            client_inboxes: Vec::new(),
        })
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.server.config().port
    }

    /// Start a client speaking the server's protocol. Returns its index.
    pub fn add_client(&mut self) -> Result<usize, SessionError> {
        let protocol_name = self.server.config().protocol_name.clone();
        self.add_client_with_protocol(&protocol_name)
    }

    /// Start a client speaking `protocol_name`. Returns its index.
    pub fn add_client_with_protocol(&mut self, protocol_name: &str) -> Result<usize, SessionError> {
        let config = ClientConfig {
            protocol_name: protocol_name.to_string(),
            host: "sim".to_string(),
            port: self.port(),
        };

        let mut client = Client::new(self.network.client(), config);
        client.start()?;

        self.clients.push(client);
        self.client_events.push(Vec::new());
        self.client_inboxes.push(Vec::new());

        Ok(self.clients.len() - 1)
    }

    /// ID the server assigned to client `idx`.
    pub fn client_id(&self, idx: usize) -> Option<ConnectionId> {
        self.clients.get(idx).and_then(|c| c.transport().connection_id())
    }

    /// One server tick: advance time, drain events, flush.
    pub fn tick_server(&mut self) -> Result<(), SessionError> {
        self.server.add_time(TICK);

        let mut msg = Message::new();
        while let Some(event) = self.server.poll()? {
            self.server_events.push(event);

            match event {
                ServerEvent::ConnectionRequest if self.auto_admit => {
                    self.server.admit_incoming()?;
                },
                ServerEvent::MessageReceived => {
                    self.server.read_received_message(&mut msg)?;
                    let sender = msg.sender_id().ok_or(SessionError::NoMessageAvailable)?;
                    self.server_inbox.push((sender, msg.bytes().to_vec()));
                },
                _ => {},
            }
        }

        self.server.flush()
    }

    /// One tick of client `idx`.
    pub fn tick_client(&mut self, idx: usize) -> Result<(), SessionError> {
        let Some(client) = self.clients.get_mut(idx) else {
            return Ok(());
        };
        if !client.is_running() {
            return Ok(());
        }

        client.add_time(TICK);

        let mut msg = Message::new();
        while let Some(event) = client.poll()? {
            self.client_events[idx].push(event);

            if event == ClientEvent::MessageReceived {
                client.read_received_message(&mut msg)?;
                self.client_inboxes[idx].push(msg.bytes().to_vec());
            }
        }

        client.flush()
    }

    /// Every client, then the server, then every client again.
    ///
    /// A message sent by a client before `tick` is read by the server and its
    /// reply reaches the client within the same call.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        for idx in 0..self.clients.len() {
            self.tick_client(idx)?;
        }
        self.tick_server()?;
        for idx in 0..self.clients.len() {
            self.tick_client(idx)?;
        }
        Ok(())
    }

    /// Run `ticks` full ticks.
    pub fn run(&mut self, ticks: usize) -> Result<(), SessionError> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }
}
