//! Periodic roster refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionPort;
use crate::error::LobbyError;
use crate::protocol::Command;

/// One long-lived task per session that sends `get playerlist` every
/// interval while active.
///
/// The tick checks the active flag and sends under the same lock that
/// [`pause`](RosterPoller::pause) takes, so once `pause` returns no further
/// refresh goes out until [`resume`](RosterPoller::resume).
pub struct RosterPoller {
    active: Arc<Mutex<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl RosterPoller {
    /// Spawn a paused poller.
    pub fn spawn(port: Arc<dyn ConnectionPort>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let active = Arc::new(Mutex::new(false));
        let task = tokio::spawn(poll_loop(port, Arc::clone(&active), interval));
        Self {
            active,
            task: Mutex::new(Some(task)),
            interval,
        }
    }

    /// Start sending refreshes. No-op if already active.
    pub async fn resume(&self) {
        let mut active = self.active.lock().await;
        if !*active {
            debug!("roster poller resumed");
            *active = true;
        }
    }

    pub async fn pause(&self) {
        let mut active = self.active.lock().await;
        if *active {
            debug!("roster poller paused");
            *active = false;
        }
    }

    pub async fn is_active(&self) -> bool {
        *self.active.lock().await
    }

    /// Stop the poller for good.
    pub async fn shutdown(&self) {
        *self.active.lock().await = false;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            if let Err(join_err) = task.await {
                trace!("roster poller stopped: {join_err}");
            }
        }
    }
}

impl std::fmt::Debug for RosterPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterPoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Drop for RosterPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn poll_loop(port: Arc<dyn ConnectionPort>, active: Arc<Mutex<bool>>, interval: Duration) {
    // Login and return-to-lobby request a roster themselves, so the first
    // refresh is one interval out.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let active = active.lock().await;
        if !*active {
            continue;
        }
        match port.send(Command::GetPlayerList) {
            Ok(()) => trace!("roster refresh requested"),
            Err(LobbyError::NotConnected) => {
                debug!("connection closed, roster poller exiting");
                break;
            }
            Err(e) => warn!("roster refresh failed: {e}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::connection::recording::RecordingPort;

    const PERIOD: Duration = Duration::from_secs(5);

    fn refreshes(port: &RecordingPort) -> usize {
        port.count(&Command::GetPlayerList)
    }

    #[tokio::test(start_paused = true)]
    async fn paused_poller_sends_nothing() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(refreshes(&port), 0);
        assert!(!poller.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_poller_refreshes_every_interval() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);

        // Ticks at 5 and 10 s pass while paused.
        tokio::time::sleep(Duration::from_secs(12)).await;
        poller.resume().await;
        // Ticks at 15 and 20 s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(refreshes(&port), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_refresh_after_pause_returns() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);
        poller.resume().await;

        tokio::time::sleep(Duration::from_secs(7)).await;
        poller.pause().await;
        let before = refreshes(&port);
        assert!(before >= 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(refreshes(&port), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_racing_a_due_tick_wins() {
        let interval = Duration::from_millis(2);
        for _ in 0..50 {
            let port = RecordingPort::new();
            let poller = Arc::new(RosterPoller::spawn(port.clone(), interval));
            poller.resume().await;
            tokio::time::sleep(interval).await;

            let pausing = tokio::spawn({
                let poller = Arc::clone(&poller);
                async move { poller.pause().await }
            });
            pausing.await.unwrap();
            let after_pause = refreshes(&port);

            tokio::time::sleep(interval * 5).await;
            assert_eq!(refreshes(&port), after_pause);
            poller.shutdown().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resume_twice_keeps_one_schedule() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);
        tokio::time::sleep(Duration::from_secs(2)).await;
        poller.resume().await;
        poller.resume().await;

        // Ticks at 5 and 10 s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(refreshes(&port), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_refreshes() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);
        poller.resume().await;
        poller.shutdown().await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(refreshes(&port), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_exits_when_connection_closes() {
        let port = RecordingPort::new();
        let poller = RosterPoller::spawn(port.clone(), PERIOD);
        port.disconnect();
        poller.resume().await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        let task = poller.task.lock().await.take().unwrap();
        assert!(task.is_finished());
    }
}
