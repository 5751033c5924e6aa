//! Top-level lobby client.
//!
//! [`LobbyClient`] wires the pieces together: it starts a [`Connection`]
//! over a transport, builds a [`Session`] on top of it and spawns the event
//! pump that feeds server events into the session.
//!
//! # Example
//!
//! ```rust,ignore
//! let (actions, mut action_rx) = ActionDispatcher::channel();
//! let modules = ModuleDispatcher::new()
//!     .with_module(ModuleKind::Reversi, |local, opponent| -> ModuleHandle {
//!         Arc::new(MyReversi::new(local, opponent))
//!     });
//!
//! let client = LobbyClient::connect("127.0.0.1:7789", modules, actions, LobbyConfig::default()).await?;
//! client.session().login(LoginRequest::human("Alice")).await?;
//!
//! while let Some(action) = action_rx.recv().await {
//!     match action {
//!         Action::ShowChallengePrompt(prompt) => prompt.accept(),
//!         Action::LaunchModule(module) => { /* hand to the view */ }
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::action::ActionDispatcher;
use crate::config::LobbyConfig;
use crate::connection::Connection;
use crate::dispatch::ModuleDispatcher;
use crate::session::Session;
use crate::transport::Transport;

#[cfg(feature = "transport-tcp")]
use crate::action::Action;
#[cfg(feature = "transport-tcp")]
use crate::error::{LobbyError, Result};
#[cfg(feature = "transport-tcp")]
use crate::transports::TcpTransport;

/// A connected lobby client.
pub struct LobbyClient {
    connection: Arc<Connection>,
    session: Session,
    pump: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl LobbyClient {
    /// Connect to a lobby server at `address` (`host:port`) over TCP.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidAddress`] for a malformed address, otherwise
    /// [`LobbyError::ConnectionUnavailable`]. Either way an alert is
    /// dispatched and no session is created.
    #[cfg(feature = "transport-tcp")]
    pub async fn connect(
        address: &str,
        modules: ModuleDispatcher,
        actions: ActionDispatcher,
        config: LobbyConfig,
    ) -> Result<Self> {
        match TcpTransport::connect_with_timeout(address, config.connect_timeout).await {
            Ok(transport) => Ok(Self::start(transport, modules, actions, config)),
            Err(e) => {
                warn!(address, "connection failed: {e}");
                let e = match e {
                    invalid @ LobbyError::InvalidAddress(_) => invalid,
                    other => LobbyError::ConnectionUnavailable(other.to_string()),
                };
                actions.dispatch(Action::alert("Unable to connect", e.to_string()));
                Err(e)
            }
        }
    }

    /// Start a client over an already-connected transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        transport: impl Transport,
        modules: ModuleDispatcher,
        actions: ActionDispatcher,
        config: LobbyConfig,
    ) -> Self {
        let (connection, events) = Connection::start(transport, &config);
        let connection = Arc::new(connection);
        let session = Session::new(connection.clone(), modules, actions, &config);

        let pump = tokio::spawn({
            let session = session.clone();
            async move { session.run(events).await }
        });

        Self {
            connection,
            session,
            pump: Mutex::new(Some(pump)),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the connection and stop every background task.
    ///
    /// The session sees a final `Disconnected` event and drops back to
    /// logged out.
    pub async fn shutdown(&self) {
        debug!(session = %self.session.id(), "client shutdown requested");
        self.connection.shutdown().await;

        let pump = self.pump.lock().await.take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(self.shutdown_timeout, &mut pump)
                .await
                .is_err()
            {
                warn!("event pump did not finish within timeout; aborting");
                pump.abort();
            }
        }
        self.session.shutdown().await;
    }
}

impl std::fmt::Debug for LobbyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyClient")
            .field("session", &self.session.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for LobbyClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}
