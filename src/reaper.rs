//! Periodic sweep that frees sessions marked destroyed more than a grace
//! period ago.

use std::sync::Arc;
use std::time::Duration;

use crate::session::SessionStore;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Spawn the reaper task. Runs for the life of the plugin instance; there
/// is no handle to stop it short of dropping the runtime, matching the
/// teacher's fire-and-forget background tasks.
pub fn spawn(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let freed = store.reap(GRACE_PERIOD);
            if freed > 0 {
                tracing::debug!(freed, "reaper freed destroyed sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reaper_frees_after_grace_period() {
        let store = Arc::new(SessionStore::new());
        store.create(1);
        store.destroy(1);

        let handle = spawn(store.clone());
        // The store's own grace period (5s) is too slow for a unit test;
        // exercise the sweep logic directly instead of waiting on the task.
        assert_eq!(store.reap(Duration::from_secs(0)), 1);
        handle.abort();
    }
}
