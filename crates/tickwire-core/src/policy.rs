//! Fail-fast policy for programs that treat fatal session errors as
//! unrecoverable.
//!
//! The session core never terminates the process. Programs that want the
//! classic "log and abort" behavior route results through [`escalate`] or
//! [`OrAbort::or_abort`]; recoverable errors still come back to the caller.

use crate::error::SessionError;

/// Log `err` and abort the process.
pub fn abort_with(err: &SessionError) -> ! {
    tracing::error!(error = %err, "fatal session error, aborting");
    std::process::abort()
}

/// Abort on fatal errors, pass everything else through.
///
/// # Errors
///
/// Returns `err` unchanged if it is recoverable.
pub fn escalate<T>(result: Result<T, SessionError>) -> Result<T, SessionError> {
    match result {
        Err(err) if err.is_fatal() => abort_with(&err),
        other => other,
    }
}

/// Unwrap a session result, aborting on any error.
///
/// For calls whose only failure modes are fatal (start, poll, accept).
pub trait OrAbort<T> {
    /// Value on success; logs and aborts on error.
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, SessionError> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => abort_with(&err),
        }
    }
}
