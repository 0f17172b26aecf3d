use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::session::coordinator::SessionCoordinator;

/// Starts the periodic idle-room sweep. This is the safety net that bounds
/// memory held by abandoned rooms whose disconnect events never fired; it
/// runs independently of any connection's lifecycle.
pub fn start(
    coordinator: Arc<SessionCoordinator>,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh server does
        // not sweep before anyone has joined
        ticker.tick().await;

        tracing::info!(
            interval_secs = interval.as_secs(),
            stale_secs = stale_after.as_secs(),
            "Idle room reaper started"
        );

        loop {
            ticker.tick().await;
            let removed = coordinator.sweep_idle_rooms(Utc::now(), stale_after).await;
            if removed > 0 {
                tracing::info!(removed, "Reaper sweep removed rooms");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::bridge::AttendanceBridge;
    use crate::session::messages::JoinProfile;
    use crate::session::registry::ConnectionId;
    use crate::store::memory::{InMemoryAttendanceStore, InMemoryClassStore, LoggingNotifier};
    use crate::store::ProfileVerifier;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_sweeps_on_interval() {
        let bridge = AttendanceBridge::new(
            Arc::new(InMemoryClassStore::new()),
            Arc::new(InMemoryAttendanceStore::new()),
        );
        let coordinator =
            SessionCoordinator::new(bridge, Arc::new(LoggingNotifier), Arc::new(ProfileVerifier));

        // One participant whose disconnect event never fires
        let conn = ConnectionId::allocate();
        let (tx, _rx) = mpsc::unbounded_channel();
        coordinator.register_connection(conn, tx).await;
        coordinator
            .handle_join(
                conn,
                "room-1",
                "class-1",
                &JoinProfile {
                    user_id: "alice".to_string(),
                    name: "alice".to_string(),
                    role: "student".to_string(),
                },
            )
            .await
            .unwrap();

        let handle = start(
            coordinator.clone(),
            Duration::from_secs(60),
            Duration::from_secs(0),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(!coordinator.registry().room_exists("room-1").await);
        handle.abort();
    }
}
