//! Periodic store cleanup
//!
//! Expired associations and nonces are harmless but accumulate. A background
//! task prunes both stores on a fixed interval, independent of the login path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::store::{AssociationStore, NonceStore};

/// Entries removed by one cleanup cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub associations: usize,
    pub nonces: usize,
}

/// Spawn a background task that clears expired entries every `interval`.
pub fn spawn_cleanup_task(
    associations: Arc<dyn AssociationStore>,
    nonces: Arc<dyn NonceStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick fires immediately; stores were just opened
        ticker.tick().await;

        loop {
            ticker.tick().await;
            cleanup_cycle(associations.as_ref(), nonces.as_ref()).await;
        }
    })
}

/// Run one cleanup cycle. Store errors are logged and retried next cycle.
pub async fn cleanup_cycle(
    associations: &dyn AssociationStore,
    nonces: &dyn NonceStore,
) -> CleanupReport {
    let now = Utc::now();
    let mut report = CleanupReport::default();

    match associations.clear_expired(now).await {
        Ok(n) => report.associations = n,
        Err(e) => warn!(error = %e, "failed to clear expired associations"),
    }
    match nonces.clear_expired(now).await {
        Ok(n) => report.nonces = n,
        Err(e) => warn!(error = %e, "failed to clear expired nonces"),
    }

    if report.associations + report.nonces > 0 {
        info!(
            associations = report.associations,
            nonces = report.nonces,
            "cleared expired entries"
        );
    } else {
        debug!("nothing to clean up");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryAssociationStore, MemoryNonceStore};
    use chrono::Duration as ChronoDuration;
    use openid_auth::{Association, AssociationType};

    #[tokio::test]
    async fn cycle_removes_only_expired_entries() {
        let associations = MemoryAssociationStore::new();
        let nonces = MemoryNonceStore::new(ChronoDuration::minutes(5));
        let now = Utc::now();

        let stale = Association::new(
            "old",
            vec![1; 32],
            AssociationType::HmacSha256,
            now - ChronoDuration::hours(2),
            ChronoDuration::hours(1),
        )
        .unwrap();
        let fresh = Association::new(
            "new",
            vec![2; 32],
            AssociationType::HmacSha256,
            now,
            ChronoDuration::hours(1),
        )
        .unwrap();
        associations.store("https://op.example/", stale).await.unwrap();
        associations.store("https://op.example/", fresh).await.unwrap();

        assert!(
            nonces
                .store_nonce("https://op.example/", "a", now - ChronoDuration::hours(1))
                .await
                .unwrap()
        );
        assert!(nonces.store_nonce("https://op.example/", "b", now).await.unwrap());

        let report = cleanup_cycle(&associations, &nonces).await;
        assert_eq!(
            report,
            CleanupReport {
                associations: 1,
                nonces: 1
            }
        );
        assert_eq!(associations.len().await.unwrap(), 1);
        assert_eq!(nonces.len().await.unwrap(), 1);

        let again = cleanup_cycle(&associations, &nonces).await;
        assert_eq!(again, CleanupReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn task_skips_first_tick_then_runs() {
        let associations = Arc::new(MemoryAssociationStore::new());
        let nonces = Arc::new(MemoryNonceStore::new(ChronoDuration::minutes(5)));
        nonces
            .store_nonce("ctx", "n", Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(
            associations.clone(),
            nonces.clone(),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(nonces.len().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(nonces.len().await.unwrap(), 0);

        handle.abort();
    }
}
