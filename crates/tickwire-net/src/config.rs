//! Socket transport configuration.

use std::time::Duration;

/// Tuning for [`crate::TcpServerTransport`] and [`crate::TcpClientTransport`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Time a freshly accepted socket has to send its Hello before it is
    /// dropped. Measured in transport time (`add_time`).
    pub handshake_timeout: Duration,

    /// Outbound bytes a peer may have buffered. A reliable send beyond this
    /// fails and the peer is disconnected.
    pub max_outbound_bytes: usize,

    /// Outbound bytes above which unreliable messages are dropped.
    pub unreliable_watermark: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            max_outbound_bytes: 1024 * 1024,
            unreliable_watermark: 64 * 1024,
        }
    }
}
