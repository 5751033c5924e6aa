//! Error types for the lobby session client.

use thiserror::Error;

use crate::session::SessionPhase;

/// Errors that can occur when driving a lobby session.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Failed to send a line through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a line from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// The initial connection to the server could not be established.
    #[error("server unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The server address is not in `host:port` form.
    #[error("invalid host address `{0}`, required format: ip:port")]
    InvalidAddress(String),

    /// Attempted an operation that requires an active connection, but the
    /// connection loop has exited.
    #[error("not connected to server")]
    NotConnected,

    /// The server refused the login.
    #[error("login rejected: {message}")]
    LoginRejected {
        /// Message supplied by the server with its `ERR` reply.
        message: String,
    },

    /// A login round trip is already in flight for this session.
    #[error("a login attempt is already in progress")]
    LoginInProgress,

    /// The session already has a logged-in local player.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// The username is empty or whitespace only.
    #[error("username must not be empty")]
    InvalidUsername,

    /// The operation is not valid in the current session phase.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Phase the session was in.
        phase: SessionPhase,
    },

    /// No game module is registered for the requested game type.
    #[error("unsupported game module {0}")]
    UnsupportedGameType(String),

    /// A request did not receive a reply in time.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for lobby session operations.
pub type Result<T> = std::result::Result<T, LobbyError>;
