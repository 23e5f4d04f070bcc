//! Ping client binary.
//!
//! # Usage
//!
//! ```bash
//! # Four pings to a local echo server
//! echo-client --host 127.0.0.1 --port 42042 --count 4
//! ```
//!
//! Exits 0 once every ping came back intact and 1 otherwise, including when
//! the server refused the connection.

use std::process::ExitCode;

use clap::Parser;
use tickwire_core::{Client, ClientConfig, DEFAULT_PORT, policy};
use tickwire_echo::{DEFAULT_TICK_RATE, ECHO_PROTOCOL_NAME, EchoError, PingClient, TickDriver};
use tickwire_net::TcpClientTransport;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tickwire ping client
#[derive(Parser, Debug)]
#[command(name = "echo-client")]
#[command(about = "Sends pings to an echo server and waits for each echo")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Protocol name to present
    #[arg(long, default_value = ECHO_PROTOCOL_NAME)]
    protocol: String,

    /// Number of pings
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Ping payload
    #[arg(short, long, default_value = "ping")]
    message: String,

    /// Ticks per second
    #[arg(long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(EchoError::Session(err)) => policy::abort_with(&err),
        Err(err) => {
            tracing::error!(error = %err, "echo client failed");
            ExitCode::FAILURE
        },
    }
}

/// Ping until done. `Ok(true)` only if every echo arrived intact.
async fn run(args: Args) -> Result<bool, EchoError> {
    let driver = TickDriver::new(args.tick_rate)?;

    let config = ClientConfig { protocol_name: args.protocol, host: args.host, port: args.port };
    let client = Client::new(TcpClientTransport::default(), config);
    let mut app = PingClient::new(client, args.message, args.count);

    app.start()?;

    let result = driver.run(&mut app).await;
    let report = app.report();
    app.stop();

    let summary = result?;
    tracing::info!(
        sent = report.sent,
        echoed = report.echoed,
        mismatched = report.mismatched,
        close_code = ?report.close_code,
        "ping finished"
    );

    Ok(summary.is_clean() && report.is_complete(args.count))
}
