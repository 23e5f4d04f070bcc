//! Echo server and ping client over the loopback network.
//!
//! Ticks are stepped by hand so every exchange is deterministic.

use std::time::Duration;

use tickwire_core::{
    Client, ClientConfig, DEFAULT_BUSY_CODE, DEFAULT_PORT, Server, ServerConfig, SessionError,
};
use tickwire_echo::{EchoError, EchoServer, PingClient, TickApp, TickOutcome};
use tickwire_harness::{SimClientTransport, SimNetwork, SimServerTransport};

const TICK: Duration = Duration::from_millis(16);

fn echo_server(network: &SimNetwork, max_clients: usize) -> EchoServer<SimServerTransport> {
    let config = ServerConfig { max_clients, ..ServerConfig::default() };
    let mut app = EchoServer::new(Server::new(network.server(), config));
    app.start().expect("server should start");
    app
}

fn ping_client(network: &SimNetwork, count: usize) -> PingClient<SimClientTransport> {
    let client = Client::new(network.client(), ClientConfig::default());
    let mut app = PingClient::new(client, *b"ping", count);
    app.start().expect("client should start");
    app
}

/// Tick client then server until the client finishes. Returns ticks taken.
fn run_to_completion(
    server: &mut EchoServer<SimServerTransport>,
    client: &mut PingClient<SimClientTransport>,
) -> usize {
    for tick in 1..=100 {
        let outcome = client.tick(TICK).expect("client tick");
        server.tick(TICK).expect("server tick");
        if outcome == TickOutcome::Finished {
            return tick;
        }
    }
    panic!("ping client did not finish within 100 ticks");
}

#[test]
fn single_ping_round_trip() {
    let network = SimNetwork::new(1);
    let mut server = echo_server(&network, 1);
    let mut client = ping_client(&network, 1);

    run_to_completion(&mut server, &mut client);

    let report = client.report();
    assert_eq!(report.sent, 1);
    assert_eq!(report.echoed, 1);
    assert!(report.is_complete(1));
    assert_eq!(report.close_code, None);

    let stats = server.stats();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.echoed, 1);
    assert_eq!(stats.disconnects, 1, "client disconnects gracefully when done");
    assert_eq!(server.server().client_count(), 0);
}

#[test]
fn pings_go_one_at_a_time() {
    let network = SimNetwork::new(2);
    let mut server = echo_server(&network, 1);
    let mut client = ping_client(&network, 5);

    run_to_completion(&mut server, &mut client);

    assert!(client.report().is_complete(5));
    assert_eq!(server.stats().echoed, 5);

    let sent = network.sent_messages(DEFAULT_PORT);
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|m| m.payload.as_ref() == b"ping"));
}

#[test]
fn busy_server_refuses_second_client() {
    let network = SimNetwork::new(3);
    let mut server = echo_server(&network, 1);
    let mut first = ping_client(&network, 50);

    first.tick(TICK).expect("tick");
    server.tick(TICK).expect("tick");
    first.tick(TICK).expect("tick");
    assert!(first.client().is_connected());

    let mut second = ping_client(&network, 1);
    server.tick(TICK).expect("tick");

    assert_eq!(second.tick(TICK).expect("tick"), TickOutcome::Finished);
    let report = second.report();
    assert_eq!(report.close_code, Some(DEFAULT_BUSY_CODE));
    assert!(!report.is_complete(1));

    assert_eq!(server.stats().refused, 1);
    assert!(first.client().is_connected());
}

#[test]
fn failed_flush_is_reported_and_recovered() {
    let network = SimNetwork::new(4);
    let mut server = echo_server(&network, 1);
    let mut client = ping_client(&network, 1);

    client.tick(TICK).expect("tick");
    server.tick(TICK).expect("tick");
    client.tick(TICK).expect("tick");

    network.fail_next_flush(DEFAULT_PORT);
    let err = server.tick(TICK).expect_err("flush should fail");
    assert!(matches!(err, EchoError::Session(SessionError::Flush(_))));
    assert!(!err.is_fatal());

    run_to_completion(&mut server, &mut client);
    assert!(client.report().is_complete(1));
}

#[test]
fn poll_failure_is_fatal() {
    let network = SimNetwork::new(5);
    let mut server = echo_server(&network, 1);

    network.inject_server_error(DEFAULT_PORT, "corrupt stream");
    let err = server.tick(TICK).expect_err("poll should fail");

    assert!(matches!(err, EchoError::Session(SessionError::Poll(_))));
    assert!(err.is_fatal());
}

#[test]
fn stopped_server_ends_the_ping_session() {
    let network = SimNetwork::new(6);
    let mut server = echo_server(&network, 1);
    let mut client = ping_client(&network, 50);

    client.tick(TICK).expect("tick");
    server.tick(TICK).expect("tick");
    client.tick(TICK).expect("tick");

    server.stop();

    assert_eq!(client.tick(TICK).expect("tick"), TickOutcome::Finished);
    assert!(!client.report().is_complete(50));
}
