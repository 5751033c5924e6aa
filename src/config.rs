//! Client configuration.

use std::time::Duration;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default interval between background roster refreshes.
const DEFAULT_ROSTER_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default time to wait for the server's reply to a request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the TCP connect.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a [`LobbyClient`](crate::client::LobbyClient) and the
/// session it drives.
///
/// Every field has a default; use the `with_*` methods to tune.
///
/// # Example
///
/// ```
/// use lobby_session_client::config::LobbyConfig;
/// use std::time::Duration;
///
/// let config = LobbyConfig::default()
///     .with_roster_refresh_interval(Duration::from_secs(2))
///     .with_request_timeout(Duration::from_secs(3));
/// assert_eq!(config.roster_refresh_interval, Duration::from_secs(2));
/// assert_eq!(config.event_channel_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How often the roster poller sends `get playerlist` while the session
    /// is not in a match.
    ///
    /// Defaults to **5 seconds**. Values below 1 ms are clamped to 1 ms.
    pub roster_refresh_interval: Duration,
    /// How long a request (login, challenge accept) waits for the server's
    /// `OK`/`ERR` before failing with [`LobbyError::Timeout`](crate::error::LobbyError::Timeout).
    ///
    /// Defaults to **10 seconds**.
    pub request_timeout: Duration,
    /// How long [`LobbyClient::connect`](crate::client::LobbyClient::connect)
    /// waits for the TCP handshake.
    ///
    /// Defaults to **5 seconds**.
    pub connect_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Roster and game list snapshots are dropped (with a warning) when the
    /// consumer falls behind; every other event waits for room.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the connection loop gets to close the transport on shutdown
    /// before it is aborted.
    ///
    /// Defaults to **1 second**. A zero timeout aborts immediately.
    pub shutdown_timeout: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            roster_refresh_interval: DEFAULT_ROSTER_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl LobbyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the roster refresh interval. Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_roster_refresh_interval(mut self, interval: Duration) -> Self {
        self.roster_refresh_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LobbyConfig::default();
        assert_eq!(config.roster_refresh_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn zero_values_are_clamped() {
        let config = LobbyConfig::new()
            .with_event_channel_capacity(0)
            .with_roster_refresh_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.roster_refresh_interval, Duration::from_millis(1));
    }
}
