//! Transport implementations for the lobby line protocol.
//!
//! Concrete [`Transport`](crate::transport::Transport) implementations live
//! behind feature gates:
//!
//! | Feature         | Transport        |
//! |-----------------|------------------|
//! | `transport-tcp` | [`TcpTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), lobby_session_client::LobbyError> {
//! use lobby_session_client::{TcpTransport, Transport};
//!
//! let mut tcp = TcpTransport::connect("127.0.0.1:7789").await?;
//! tcp.send("get gamelist".to_string()).await?;
//!
//! if let Some(Ok(line)) = tcp.recv().await {
//!     println!("server said: {line}");
//! }
//!
//! tcp.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-tcp")]
pub mod tcp;

#[cfg(feature = "transport-tcp")]
pub use tcp::{parse_host_port, TcpTransport};
