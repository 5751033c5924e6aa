//! Newline-delimited TCP transport.
//!
//! The lobby server speaks one command or message per line. Lines are written
//! with a trailing `\n`; incoming lines may end in `\n` or `\r\n`.
//!
//! # Feature gate
//!
//! Only available with the `transport-tcp` feature (enabled by default).

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::LobbyError;
use crate::transport::Transport;

/// Validate a `host:port` server address.
///
/// The host may be an IP address or a name; the port must be a number.
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`LobbyError::InvalidAddress`] if the address does not have
/// exactly one `:` separating a non-empty host from a valid port.
///
/// ```
/// use lobby_session_client::transports::parse_host_port;
///
/// assert_eq!(parse_host_port(" 127.0.0.1:7789 ").unwrap(), ("127.0.0.1".to_string(), 7789));
/// assert!(parse_host_port("localhost").is_err());
/// ```
pub fn parse_host_port(address: &str) -> Result<(String, u16), LobbyError> {
    let address = address.trim();
    let invalid = || LobbyError::InvalidAddress(address.to_string());

    let mut parts = address.split(':');
    let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// A [`Transport`] over a plain TCP connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: bytes of a partially read line
/// stay in a buffer owned by the transport and the next call continues from
/// there.
///
/// Lines are decoded lossily, so a server line that is not valid UTF-8 still
/// reaches the parser instead of failing the connection.
#[derive(Debug)]
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
    writer: OwnedWriteHalf,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl TcpTransport {
    /// Connect to `address` in `host:port` form.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidAddress`] for a malformed address, or
    /// [`LobbyError::Io`] if the connection cannot be established.
    pub async fn connect(address: &str) -> Result<Self, LobbyError> {
        let (host, port) = parse_host_port(address)?;
        tracing::debug!(%host, port, "connecting to lobby server");

        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let transport = Self::from_stream(stream);

        tracing::info!(peer = ?transport.peer, "lobby server connection established");
        Ok(transport)
    }

    /// Like [`connect`](Self::connect), but fails with
    /// [`LobbyError::Timeout`] if the connection is not established in time.
    ///
    /// # Errors
    ///
    /// [`LobbyError::Timeout`] if the deadline elapses, or any error that
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        address: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, LobbyError> {
        tokio::time::timeout(timeout, Self::connect(address))
            .await
            .map_err(|_| LobbyError::Timeout)?
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            line: Vec::new(),
            writer: write,
            peer,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, line: String) -> Result<(), LobbyError> {
        if self.closed {
            return Err(LobbyError::TransportClosed);
        }
        let mut framed = line.into_bytes();
        framed.push(b'\n');
        self.writer
            .write_all(&framed)
            .await
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
        if self.closed {
            return None;
        }
        match self.reader.read_until(b'\n', &mut self.line).await {
            // EOF with nothing buffered.
            Ok(0) if self.line.is_empty() => None,
            Ok(_) => {
                let bytes = std::mem::take(&mut self.line);
                let line = bytes.strip_suffix(b"\n").unwrap_or(bytes.as_slice());
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                Some(Ok(String::from_utf8_lossy(line).into_owned()))
            }
            Err(e) => Some(Err(LobbyError::TransportReceive(e.to_string()))),
        }
    }

    async fn close(&mut self) -> Result<(), LobbyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer
            .shutdown()
            .await
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn host_port_validation() {
        assert_eq!(
            parse_host_port("localhost:7789").unwrap(),
            ("localhost".to_string(), 7789)
        );
        for bad in ["", "localhost", ":7789", "host:port", "a:1:2", "host:70000"] {
            assert!(
                matches!(parse_host_port(bad), Err(LobbyError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn frames_lines_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"OK\r\nSVR GAMELIST [\"Reversi\"]\n")
                .await
                .unwrap();
            let mut received = vec![0u8; 14];
            socket.read_exact(&mut received).await.unwrap();
            String::from_utf8(received).unwrap()
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "OK");
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            "SVR GAMELIST [\"Reversi\"]"
        );
        transport.send("login Alice".to_string()).await.unwrap();
        transport.send("x".to_string()).await.unwrap();

        assert_eq!(server.await.unwrap(), "login Alice\nx\n");
        transport.close().await.unwrap();
        assert!(matches!(
            transport.send("late".to_string()).await,
            Err(LobbyError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_delivered_lossily() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"SVR PLAYERLIST [\"Jos\xe9\"]\nOK\n")
                .await
                .unwrap();
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        let line = transport.recv().await.unwrap().unwrap();
        assert_eq!(line, "SVR PLAYERLIST [\"Jos\u{fffd}\"]");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "OK");
    }

    #[tokio::test]
    async fn unterminated_last_line_is_delivered_before_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ERR bye").await.unwrap();
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "ERR bye");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_recv_keeps_partial_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SVR GAME").await.unwrap();
            resume_rx.await.unwrap();
            socket.write_all(b"LIST [\"Reversi\"]\n").await.unwrap();
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        let first =
            tokio::time::timeout(std::time::Duration::from_millis(100), transport.recv()).await;
        assert!(first.is_err(), "no complete line yet");

        resume_tx.send(()).unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            "SVR GAMELIST [\"Reversi\"]"
        );
    }

    #[tokio::test]
    async fn server_hangup_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(matches!(
            TcpTransport::connect(&address).await,
            Err(LobbyError::Io(_))
        ));
    }
}
