//! Echo server binary.
//!
//! # Usage
//!
//! ```bash
//! # One client at a time on the default port
//! echo-server
//!
//! # Room for four clients, verbose logging
//! echo-server --port 42042 --max-clients 4 --log-level debug
//! ```
//!
//! Exits 0 on a clean ctrl-c shutdown and 1 if any tick reported an error.

use std::process::ExitCode;

use clap::Parser;
use tickwire_core::{DEFAULT_BUSY_CODE, DEFAULT_PORT, Server, ServerConfig, policy};
use tickwire_echo::{DEFAULT_TICK_RATE, ECHO_PROTOCOL_NAME, EchoError, EchoServer, TickDriver};
use tickwire_net::{TcpConfig, TcpServerTransport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tickwire echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(about = "Echoes every message back to its sender")]
#[command(version)]
struct Args {
    /// Protocol name clients must present
    #[arg(long, default_value = ECHO_PROTOCOL_NAME)]
    protocol: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Ticks per second
    #[arg(long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Clients served at once; the rest are refused
    #[arg(long, default_value_t = 1)]
    max_clients: usize,

    /// Code sent to refused clients
    #[arg(long, default_value_t = DEFAULT_BUSY_CODE)]
    busy_code: u32,

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
            tracing::error!(error = %err, "echo server failed");
            ExitCode::FAILURE
        },
    }
}

/// Serve until ctrl-c. `Ok(false)` if any tick reported an error.
async fn run(args: Args) -> Result<bool, EchoError> {
    let driver = TickDriver::new(args.tick_rate)?;

    let config = ServerConfig {
        protocol_name: args.protocol,
        port: args.port,
        max_clients: args.max_clients,
        busy_code: args.busy_code,
        ..ServerConfig::default()
    };
    let transport = TcpServerTransport::new(TcpConfig::default());
    let mut app = EchoServer::new(Server::new(transport, config));

    app.start()?;
    tracing::info!(tick_rate = args.tick_rate, "echo server running, ctrl-c to stop");

    let result = driver.run(&mut app).await;
    let stats = app.stats();
    app.stop();

    let summary = result?;
    tracing::info!(
        ticks = summary.ticks,
        failed_ticks = summary.failed_ticks,
        admitted = stats.admitted,
        refused = stats.refused,
        echoed = stats.echoed,
        "echo server stopped"
    );

    Ok(summary.is_clean())
}
