//! Background eviction sweeper.
//!
//! Runs [`Registry::sweep`] on a fixed interval. Passes run strictly one
//! after another on a single task, and ticks missed while a pass is still
//! running are skipped rather than queued up. Failures are logged and
//! never reach request callers.

use crate::services::registry::Registry;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Handle to the running sweeper.
///
/// Dropping the handle signals the task to stop after any pass in progress.
/// Use [`EvictionSweeper::shutdown`] to also wait for it.
#[derive(Debug)]
pub struct EvictionSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl EvictionSweeper {
    /// Spawn the sweeper using the registry's configured interval.
    pub fn start(registry: Registry) -> Self {
        let interval = registry.config().sweep_interval();
        Self::start_with_interval(registry, interval)
    }

    pub fn start_with_interval(registry: Registry, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sweeper_loop(registry, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs_f64(), "eviction sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Ask the task to stop. A pass that is already running completes first.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the task and wait until it has exited.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!("eviction sweeper task failed: {}", err);
            }
        }
        info!("eviction sweeper stopped");
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    registry: Registry,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("eviction sweeper received shutdown signal");
                    return;
                }
                continue;
            }
        }

        run_pass(&registry).await;
    }
}

/// One sweep with its outcome logged.
pub async fn run_pass(registry: &Registry) {
    match registry.sweep().await {
        Ok(report) if report.removed() > 0 || report.file_errors > 0 => info!(
            scanned = report.scanned,
            expired = report.expired,
            orphaned = report.orphaned,
            file_errors = report.file_errors,
            "sweep removed records"
        ),
        Ok(report) => debug!(scanned = report.scanned, "sweep found nothing to remove"),
        Err(err) => error!("sweep failed, will retry next interval: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RegistryConfig,
        services::{clock::ManualClock, metadata_store::JsonFileStore},
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn registry_with_clock(dir: &TempDir, clock: Arc<ManualClock>) -> Registry {
        let store = Arc::new(
            JsonFileStore::open(dir.path().join("file_data.json"))
                .await
                .unwrap(),
        );
        let mut config = RegistryConfig::new(dir.path().join("uploads"));
        config.ttl_seconds = 300;
        Registry::with_clock(config, store, clock).await.unwrap()
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_uploads() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = registry_with_clock(&dir, clock.clone()).await;

        let created = registry.create(b"bye", "old.txt").await.unwrap();
        clock.set(301.0);

        let sweeper =
            EvictionSweeper::start_with_interval(registry.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.shutdown().await;

        assert!(registry.is_empty().await);
        assert!(!registry.path_for(&created.stored_name).exists());
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = registry_with_clock(&dir, clock.clone()).await;

        let sweeper =
            EvictionSweeper::start_with_interval(registry.clone(), Duration::from_millis(10));
        sweeper.shutdown().await;

        registry.create(b"still here", "late.txt").await.unwrap();
        clock.set(10_000.0);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing sweeps any more, so the expired record is still listed.
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_task() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = registry_with_clock(&dir, clock.clone()).await;

        {
            let _sweeper =
                EvictionSweeper::start_with_interval(registry.clone(), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        registry.create(b"data", "kept.txt").await.unwrap();
        clock.set(10_000.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.len().await, 1);
    }
}
