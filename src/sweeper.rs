//! Periodic liveness sweep over the room registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;

use crate::rooms::RoomRegistry;

/// Spawn the background sweep task. Returns a handle the caller aborts at
/// shutdown. The sweep itself is infallible in-memory work, so a cycle can
/// never take the task down; it reschedules forever.
pub fn spawn_sweeper(rooms: Arc<RoomRegistry>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs, "Liveness sweeper started");

        let mut timer = interval(Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so startup isn't a sweep.
        timer.tick().await;

        loop {
            timer.tick().await;
            rooms.sweep(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayConfig;

    #[tokio::test]
    async fn sweeper_aborts_cleanly() {
        let rooms = Arc::new(RoomRegistry::new(RelayConfig::default()));
        let handle = spawn_sweeper(rooms, 300);

        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn sweeper_runs_periodically() {
        let rooms = Arc::new(RoomRegistry::new(RelayConfig::default()));
        rooms.join("r1", "idle", "Laptop", "10.0.0.1");
        rooms.backdate_device("r1", "idle", chrono::Duration::hours(2));

        tokio::time::pause();
        let handle = spawn_sweeper(rooms.clone(), 300);

        // Cross two intervals of virtual time so at least one sweep lands.
        tokio::time::sleep(Duration::from_secs(601)).await;
        tokio::task::yield_now().await;

        assert_eq!(rooms.stats().total_devices, 0);
        handle.abort();
    }
}
