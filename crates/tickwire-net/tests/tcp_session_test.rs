//! Sessions over real localhost sockets.
//!
//! Each test starts a server on port 0 and drives server and client ticks in
//! lockstep until the expected events arrive or a deadline passes.

use std::{
    io::Write,
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;

use tickwire_core::{
    Admission, Client, ClientConfig, ClientEvent, Message, Server, ServerConfig, ServerEvent,
};
use tickwire_net::{TcpClientTransport, TcpConfig, TcpServerTransport};
use tickwire_proto::{PROTOCOL_MISMATCH_CODE, Packet};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(16);
const DEADLINE: Duration = Duration::from_secs(5);

/// Route transport logs to the test output. `RUST_LOG` picks the level.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start_server(max_clients: usize) -> (Server<TcpServerTransport>, u16) {
    init_logging();

    let config = ServerConfig {
        protocol_name: "tcp-test".to_string(),
        port: 0,
        max_clients,
        ..ServerConfig::default()
    };
    let mut server = Server::new(TcpServerTransport::new(TcpConfig::default()), config);
    server.start().expect("server should start");

    let port = server.transport().local_addr().expect("listener bound").port();
    (server, port)
}

fn start_client(port: u16, protocol_name: &str) -> Client<TcpClientTransport> {
    let config = ClientConfig {
        protocol_name: protocol_name.to_string(),
        host: "127.0.0.1".to_string(),
        port,
    };
    let mut client = Client::new(TcpClientTransport::default(), config);
    client.start().expect("client should start");
    client
}

/// One server tick: admit requests, echo messages, collect events.
fn server_tick(server: &mut Server<TcpServerTransport>, seen: &mut Vec<ServerEvent>) {
    server.add_time(TICK);

    let mut msg = Message::new();
    while let Some(event) = server.poll().expect("server poll") {
        seen.push(event);
        match event {
            ServerEvent::ConnectionRequest => {
                server.admit_incoming().expect("admission");
            },
            ServerEvent::MessageReceived => {
                server.read_received_message(&mut msg).expect("read");
                let sender = msg.sender_id().expect("server messages carry a sender");
                server.send_reliable_to(sender, msg.bytes()).expect("echo");
            },
            ServerEvent::ClientDisconnected => {},
        }
    }

    server.flush().expect("server flush");
}

fn client_tick(
    client: &mut Client<TcpClientTransport>,
    seen: &mut Vec<ClientEvent>,
    inbox: &mut Vec<Vec<u8>>,
) {
    client.add_time(TICK);

    let mut msg = Message::new();
    while let Some(event) = client.poll().expect("client poll") {
        seen.push(event);
        if event == ClientEvent::MessageReceived {
            client.read_received_message(&mut msg).expect("read");
            inbox.push(msg.bytes().to_vec());
        }
    }

    client.flush().expect("client flush");
}

fn write_packet(stream: &mut TcpStream, packet: &Packet) {
    let mut wire = Vec::with_capacity(packet.encoded_len());
    packet.encode(&mut wire).expect("encode");
    stream.write_all(&wire).expect("write");
}

/// Connect a raw socket that speaks the handshake and gets admitted.
fn admitted_raw_peer(
    server: &mut Server<TcpServerTransport>,
    port: u16,
    seen: &mut Vec<ServerEvent>,
) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    write_packet(&mut stream, &Packet::hello("tcp-test"));

    run_until(|| {
        server_tick(server, seen);
        server.client_count() == 1
    });
    stream
}

fn run_until(mut step: impl FnMut() -> bool) {
    let started = Instant::now();
    while !step() {
        assert!(started.elapsed() < DEADLINE, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn client_connects_and_gets_echo() {
    let (mut server, port) = start_server(1);
    let mut client = start_client(port, "tcp-test");

    let mut server_seen = Vec::new();
    let mut client_seen = Vec::new();
    let mut inbox = Vec::new();

    run_until(|| {
        client_tick(&mut client, &mut client_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        client.is_connected()
    });

    assert_eq!(server.client_count(), 1);

    client.send_reliable(b"ping 1").expect("send");
    client.send_unreliable(b"ping 2").expect("send");

    run_until(|| {
        client_tick(&mut client, &mut client_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        inbox.len() == 2
    });

    assert_eq!(inbox, vec![b"ping 1".to_vec(), b"ping 2".to_vec()]);
}

#[test]
fn second_client_is_rejected_with_busy_code() {
    let (mut server, port) = start_server(1);
    let mut first = start_client(port, "tcp-test");

    let mut server_seen = Vec::new();
    let mut first_seen = Vec::new();
    let mut second_seen = Vec::new();
    let mut inbox = Vec::new();

    run_until(|| {
        client_tick(&mut first, &mut first_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        first.is_connected()
    });

    let mut second = start_client(port, "tcp-test");

    run_until(|| {
        client_tick(&mut second, &mut second_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        second_seen.contains(&ClientEvent::Disconnected)
    });

    assert_eq!(second.server_close_code(), Some(tickwire_core::DEFAULT_BUSY_CODE));
    assert!(!second.is_connected());
    assert!(first.is_connected());
    assert_eq!(server.client_count(), 1);
}

#[test]
fn wrong_protocol_name_is_rejected() {
    let (mut server, port) = start_server(1);
    let mut client = start_client(port, "someone-else");

    let mut server_seen = Vec::new();
    let mut client_seen = Vec::new();
    let mut inbox = Vec::new();

    run_until(|| {
        client_tick(&mut client, &mut client_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        client_seen.contains(&ClientEvent::Disconnected)
    });

    assert_eq!(client.server_close_code(), Some(PROTOCOL_MISMATCH_CODE));
    assert!(!server_seen.contains(&ServerEvent::ConnectionRequest));
}

#[test]
fn client_disconnect_reaches_server() {
    let (mut server, port) = start_server(1);
    let mut client = start_client(port, "tcp-test");

    let mut server_seen = Vec::new();
    let mut client_seen = Vec::new();
    let mut inbox = Vec::new();

    run_until(|| {
        client_tick(&mut client, &mut client_seen, &mut inbox);
        server_tick(&mut server, &mut server_seen);
        client.is_connected() && server.client_count() == 1
    });

    let id = server.clients().next().expect("one client");
    client.disconnect().expect("disconnect");

    run_until(|| {
        server_tick(&mut server, &mut server_seen);
        server_seen.contains(&ServerEvent::ClientDisconnected)
    });

    assert_eq!(server.disconnected_client_id(), Some(id));
    assert_eq!(server.client_count(), 0);
    assert!(server.send_reliable_to(id, b"late").is_err());
}

#[test]
fn admission_reports_accepted_id() {
    let (mut server, port) = start_server(2);
    let _client = start_client(port, "tcp-test");

    let mut admitted = None;
    run_until(|| {
        server.add_time(TICK);
        while let Some(event) = server.poll().expect("poll") {
            if event == ServerEvent::ConnectionRequest {
                admitted = Some(server.admit_incoming().expect("admission"));
            }
        }
        server.flush().expect("flush");
        admitted.is_some()
    });

    assert!(matches!(admitted, Some(Admission::Accepted(_))));
}

#[test]
fn oversized_message_from_peer_drops_only_that_peer() {
    let (mut server, port) = start_server(2);
    let mut seen = Vec::new();
    let mut raw = admitted_raw_peer(&mut server, port, &mut seen);

    let mut honest = start_client(port, "tcp-test");
    let mut honest_seen = Vec::new();
    let mut inbox = Vec::new();
    run_until(|| {
        client_tick(&mut honest, &mut honest_seen, &mut inbox);
        server_tick(&mut server, &mut seen);
        honest.is_connected() && server.client_count() == 2
    });

    let oversized = Bytes::from(vec![1u8; 5000]);
    write_packet(&mut raw, &Packet::message(true, 0, oversized));

    // `server_tick` panics if a read ever fails, so reaching the disconnect
    // means the payload never got to the session.
    run_until(|| {
        server_tick(&mut server, &mut seen);
        seen.contains(&ServerEvent::ClientDisconnected)
    });

    assert!(!seen.contains(&ServerEvent::MessageReceived));
    assert_eq!(server.client_count(), 1);

    honest.send_reliable(b"still here").expect("send");
    run_until(|| {
        client_tick(&mut honest, &mut honest_seen, &mut inbox);
        server_tick(&mut server, &mut seen);
        !inbox.is_empty()
    });
    assert_eq!(inbox, vec![b"still here".to_vec()]);
}

#[test]
fn foreign_message_type_from_peer_disconnects_it() {
    let (mut server, port) = start_server(1);
    let mut seen = Vec::new();
    let mut raw = admitted_raw_peer(&mut server, port, &mut seen);

    write_packet(&mut raw, &Packet::message(true, 7, Bytes::from_static(b"??")));

    run_until(|| {
        server_tick(&mut server, &mut seen);
        seen.contains(&ServerEvent::ClientDisconnected)
    });

    assert!(!seen.contains(&ServerEvent::MessageReceived));
    assert_eq!(server.client_count(), 0);
}

#[test]
fn oversized_message_from_server_closes_client() {
    init_logging();
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let mut client = start_client(port, "tcp-test");
    let (mut stream, _) = listener.accept().expect("accept");
    write_packet(&mut stream, &Packet::accept());

    let mut seen = Vec::new();
    let mut inbox = Vec::new();
    run_until(|| {
        client_tick(&mut client, &mut seen, &mut inbox);
        client.is_connected()
    });

    let oversized = Bytes::from(vec![2u8; tickwire_core::MAX_MESSAGE_SIZE + 1]);
    write_packet(&mut stream, &Packet::message(true, 0, oversized));

    run_until(|| {
        client_tick(&mut client, &mut seen, &mut inbox);
        seen.contains(&ClientEvent::Disconnected)
    });

    assert!(inbox.is_empty());
    assert!(!client.is_connected());
}
