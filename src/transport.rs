//! Transport abstraction for the lobby line protocol.
//!
//! The [`Transport`] trait defines a bidirectional text line channel between
//! the client and the game server. Every server message is a single line, so
//! implementations own the framing (newline-delimited TCP, WebSocket text
//! frames, an in-process channel in tests).
//!
//! # Connection Setup
//!
//! Connection setup is not part of this trait. Construct a connected
//! transport externally (for example with
//! [`TcpTransport::connect`](crate::transports::TcpTransport::connect)),
//! then pass it to `Connection::start` or `LobbyClient::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use lobby_session_client::error::LobbyError;
//! use lobby_session_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, line: String) -> Result<(), LobbyError> {
//!         // Write one command line (without trailing newline)
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
//!         // Return the next server line, or None once the server hung up
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), LobbyError> {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::LobbyError;

/// A bidirectional line transport to the lobby server.
///
/// Each call to [`send`](Transport::send) transmits one command line and each
/// call to [`recv`](Transport::recv) yields one server line, both without the
/// line terminator.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the connection
/// loop polls it inside `tokio::select!`. Cancelling a pending `recv` must not
/// lose a partially read line.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one command line to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::TransportSend`] if the line could not be written.
    async fn send(&mut self, line: String) -> Result<(), LobbyError>;

    /// Receive the next line from the server.
    ///
    /// Returns:
    /// - `Some(Ok(line))`: a complete line was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the server closed the connection
    async fn recv(&mut self) -> Option<Result<String, LobbyError>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails. Implementations release their
    /// resources regardless.
    async fn close(&mut self) -> Result<(), LobbyError>;
}
