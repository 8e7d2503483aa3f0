//! Reconnect-triggered sync

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::remote::RemoteStore;
use crate::sync::{SyncEngine, SyncReport};

/// Reachability of the remote as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Reachable,
    Unreachable,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
        })
    }
}

/// Counters returned when a monitor stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Unreachable to reachable transitions seen
    pub transitions: usize,
    /// `sync_all` runs started
    pub syncs_started: usize,
}

/// Runs a full sync every time the network comes back.
///
/// At most one sync is in flight. Transitions that arrive while it runs are
/// folded into a single follow-up run. The status before the first event is
/// taken to be unreachable, so an initial `Reachable` triggers a sync.
pub struct ConnectivityMonitor {
    engine: SyncEngine,
}

impl ConnectivityMonitor {
    pub const fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }

    /// Consume status events in the background until the sender side closes.
    pub fn spawn(self, events: mpsc::Receiver<NetworkStatus>) -> JoinHandle<MonitorStats> {
        tokio::spawn(self.run(events))
    }

    /// Consume status events until the channel closes, then let the running
    /// and scheduled syncs finish.
    ///
    /// A sync that panics counts as finished, so later reconnects still sync.
    pub async fn run(self, mut events: mpsc::Receiver<NetworkStatus>) -> MonitorStats {
        let mut running = JoinSet::new();
        let mut stats = MonitorStats::default();
        let mut status = NetworkStatus::Unreachable;
        let mut follow_up = false;
        let mut events_open = true;

        while events_open || !running.is_empty() {
            tokio::select! {
                event = events.recv(), if events_open => {
                    let Some(next) = event else {
                        events_open = false;
                        continue;
                    };
                    let reconnected =
                        status == NetworkStatus::Unreachable && next == NetworkStatus::Reachable;
                    if next != status {
                        tracing::info!("Remote is now {next}");
                    }
                    status = next;
                    if !reconnected {
                        continue;
                    }

                    stats.transitions += 1;
                    if running.is_empty() {
                        self.start_sync(&mut running, &mut stats);
                    } else {
                        tracing::debug!("Reconnected during a sync, follow-up run scheduled");
                        follow_up = true;
                    }
                }
                Some(finished) = running.join_next(), if !running.is_empty() => {
                    match finished {
                        Ok(report) if !report.is_clean() => {
                            tracing::warn!("Reconnect sync finished with problems");
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!("Reconnect sync task failed: {error}"),
                    }
                    if follow_up {
                        follow_up = false;
                        self.start_sync(&mut running, &mut stats);
                    }
                }
            }
        }

        stats
    }

    fn start_sync(&self, running: &mut JoinSet<SyncReport>, stats: &mut MonitorStats) {
        stats.syncs_started += 1;
        let engine = self.engine.clone();
        running.spawn(async move { engine.sync_all().await });
    }
}

/// Poll [`RemoteStore::ping`] every `interval` and send the status whenever it
/// changes, starting with the first check. Stops when `events` is closed.
pub fn spawn_reachability_checker(
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
    events: mpsc::Sender<NetworkStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            ticker.tick().await;
            let status = if remote.ping().await {
                NetworkStatus::Reachable
            } else {
                NetworkStatus::Unreachable
            };
            if last == Some(status) {
                continue;
            }
            last = Some(status);
            if events.send(status).await.is_err() {
                break;
            }
        }
    })
}
