//! Error taxonomy for callbox sessions.

use std::io;
use std::time::Duration;

/// Result type for callbox operations.
pub type Result<T> = std::result::Result<T, CallboxError>;

/// Everything that can go wrong between a caller and the instrument.
///
/// None of these are retried by the driver. A `Timeout` leaves the stream in an
/// unknown state, so the session should be reopened before further use.
#[derive(Debug, thiserror::Error)]
pub enum CallboxError {
    /// The stream could not be established, or the identification handshake failed.
    #[error("Cannot connect to {address}: {reason}")]
    Connection { address: String, reason: String },

    /// No terminator arrived within the allotted wait.
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// Low-level I/O fault other than a timeout.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The instrument answered `ERROR?` with a non-zero code.
    #[error("Instrument rejected `{command}` with error code {code}")]
    Instrument { code: i32, command: String },

    /// The command was accepted but `*OPC?` did not confirm completion.
    #[error("`{command}` was accepted but not completed (*OPC? replied `{reply}`)")]
    IncompleteOperation { command: String, reply: String },

    /// A lifecycle polling loop never observed its target state.
    #[error("Timed out after {waited:?} waiting for {target}")]
    LifecycleTimeout { target: String, waited: Duration },

    /// A caller-supplied value is outside the accepted set. Raised before any wire traffic.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The instrument replied with something that does not parse.
    #[error("Unexpected reply to `{request}`: `{reply}`")]
    UnexpectedReply { request: String, reply: String },

    /// The simulation application is not in the state an operation requires.
    #[error("Expected simulation state {expected}, found {actual}")]
    UnexpectedState { expected: String, actual: String },

    /// The session was disconnected.
    #[error("Session is closed")]
    SessionClosed,

    /// A configuration or profile file could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CallboxError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CallboxError::InvalidValue(message.into())
    }

    pub(crate) fn unexpected_reply(request: &str, reply: &str) -> Self {
        CallboxError::UnexpectedReply {
            request: request.to_string(),
            reply: reply.to_string(),
        }
    }
}
