//! Echo application errors.

use thiserror::Error;
use tickwire_core::{ConnectionId, SessionError};

/// Errors raised by the echo programs.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Tick rate of zero has no timestep.
    #[error("tick rate must be at least 1 Hz")]
    InvalidTickRate,

    /// Session layer failure; fatal or not per [`SessionError::is_fatal`].
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Echoing one message back to its sender failed.
    #[error("echo to client {id} failed")]
    Echo {
        /// Client the echo was meant for
        id: ConnectionId,
        /// Underlying send failure
        #[source]
        source: SessionError,
    },

    /// Runtime setup failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl EchoError {
    /// True if the program cannot keep ticking after this error.
    ///
    /// A failed echo only costs that one message; session errors defer to
    /// [`SessionError::is_fatal`].
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Session(err) => err.is_fatal(),
            Self::Echo { .. } => false,
            Self::InvalidTickRate | Self::Runtime(_) => true,
        }
    }
}
