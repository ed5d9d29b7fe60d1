use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::Result;
use super::expiry::{ExpiryIndex, MtimeExpiry};
use crate::config::RetentionConfig;
use crate::stream::StreamStore;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Removes expired complete documents on a fixed interval
pub struct RetentionSweeper {
    store: StreamStore,
    index: Arc<dyn ExpiryIndex>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: StreamStore, index: Arc<dyn ExpiryIndex>, interval: Duration) -> Self {
        Self {
            store,
            index,
            interval,
        }
    }

    /// Sweeper over the store's complete directory, expiring by modification time
    pub fn from_config(store: StreamStore, config: &RetentionConfig) -> Self {
        let index = MtimeExpiry::new(
            store.paths().complete_dir(),
            config.complete_ttl.as_duration(),
        );
        Self::new(store, Arc::new(index), config.sweep_interval.as_duration())
    }

    /// Remove every document the index reports as expired right now
    ///
    /// A failed removal is counted and logged; the rest of the sweep goes on.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let expired = self.index.expired_keys(SystemTime::now()).await?;
        let mut stats = SweepStats::default();

        for key in expired {
            match self.store.delete_completed(&key).await {
                Ok(true) => stats.removed += 1,
                Ok(false) => stats.missing += 1,
                Err(err) => {
                    warn!(key = %key, error = %err, "Failed to remove expired document");
                    stats.failed += 1;
                    continue;
                }
            }

            if let Err(err) = self.index.forget(&key).await {
                warn!(key = %key, error = %err, "Failed to drop key from expiry index");
            }
        }

        if stats.removed + stats.missing + stats.failed > 0 {
            info!(
                removed = stats.removed,
                missing = stats.missing,
                failed = stats.failed,
                "Retention sweep complete"
            );
        } else {
            debug!("Retention sweep found nothing to remove");
        }
        Ok(stats)
    }

    /// Run sweeps in the background until the returned handle is stopped
    ///
    /// The first sweep runs immediately.
    pub fn start(self) -> SweepHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let interval = self.interval;

        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Retention sweeper started");
            // interval() panics on a zero period
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            error!(error = %err, "Retention sweep failed");
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Retention sweeper stopped");
        });

        SweepHandle { cancel_tx, join }
    }
}

/// Handle to a running sweeper
pub struct SweepHandle {
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the sweeper to stop and wait for it; a sweep in progress finishes first
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "Retention sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::observability::Metrics;
    use crate::retention::SweepError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Index that reports a fixed set of keys and records what it was told to forget
    struct FixedIndex {
        keys: Vec<String>,
        forgotten: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExpiryIndex for FixedIndex {
        async fn expired_keys(&self, _now: SystemTime) -> Result<Vec<String>> {
            Ok(self.keys.clone())
        }

        async fn forget(&self, key: &str) -> Result<()> {
            self.forgotten.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl ExpiryIndex for BrokenIndex {
        async fn expired_keys(&self, _now: SystemTime) -> Result<Vec<String>> {
            Err(SweepError::Index("unavailable".into()))
        }
    }

    async fn store_with_documents(temp_dir: &TempDir, keys: &[&str]) -> StreamStore {
        let config = StorageConfig {
            active_dir: temp_dir.path().join("active"),
            complete_dir: temp_dir.path().join("complete"),
            ..StorageConfig::default()
        };
        let store = StreamStore::open(&config, Arc::new(Metrics::new())).await.unwrap();
        for key in keys {
            store.append(key, "{\"a\":1}").await.unwrap();
            store.append(key, "{\"a\":2}").await.unwrap();
            store.finalize(key, None).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_sweep_once_counts_removed_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_documents(&temp_dir, &["old", "keep"]).await;
        let index = Arc::new(FixedIndex {
            keys: vec!["old".into(), "gone".into(), "../bad".into()],
            forgotten: Mutex::new(Vec::new()),
        });

        let sweeper = RetentionSweeper::new(store.clone(), index.clone(), Duration::from_secs(60));
        let stats = sweeper.sweep_once().await.unwrap();

        assert_eq!(
            stats,
            SweepStats {
                removed: 1,
                missing: 1,
                failed: 1
            }
        );
        assert!(store.read_completed("old").await.unwrap().is_none());
        assert!(store.read_completed("keep").await.unwrap().is_some());
        assert_eq!(*index.forgotten.lock().unwrap(), vec!["old".to_string(), "gone".to_string()]);
        assert_eq!(store.metrics().completed_removed, 1);
    }

    #[tokio::test]
    async fn test_index_failure_fails_the_sweep() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_documents(&temp_dir, &[]).await;
        let sweeper = RetentionSweeper::new(store, Arc::new(BrokenIndex), Duration::from_secs(60));

        assert!(matches!(sweeper.sweep_once().await, Err(SweepError::Index(_))));
    }

    #[tokio::test]
    async fn test_started_sweeper_removes_expired_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_documents(&temp_dir, &["s1", "s2"]).await;
        let config = RetentionConfig {
            enabled: true,
            complete_ttl: crate::humanize::HumanDuration::from_millis(0),
            sweep_interval: crate::humanize::HumanDuration::from_millis(20),
        };

        let handle = RetentionSweeper::from_config(store.clone(), &config).start();
        for _ in 0..50 {
            if store.read_completed("s1").await.unwrap().is_none()
                && store.read_completed("s2").await.unwrap().is_none()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.stop().await;

        assert!(store.read_completed("s1").await.unwrap().is_none());
        assert!(store.read_completed("s2").await.unwrap().is_none());
    }
}
