//! # Map Cache Service
//!
//! Owns the scheduler and the worker pool and ties their lifetimes together.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MapCacheService Lifecycle                          │
//! │                                                                         │
//! │   builder(store).with_config(..).with_role_gate(..).build()            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   STOPPED ──── start() ───────────────────────────────┐                │
//! │        ▲          │                                    │                │
//! │        │          ├── open a store session ── fail ──► Startup error   │
//! │        │          ├── read worker-threads (error → 1)                  │
//! │        │          ├── spawn Scheduler                                  │
//! │        │          └── spawn N Workers                                  │
//! │        │                    │                                           │
//! │        │                    ▼                                           │
//! │        │               RUNNING ──── start() ──► InvalidState            │
//! │        │                    │                                           │
//! │        │                    │ shutdown()                                │
//! │        │                    ▼                                           │
//! │        └──────── signal watch, join scheduler + every worker           │
//! │                                                                         │
//! │   trigger() works in either state: it bypasses the queue.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use mapcache_core::DEFAULT_WORKER_THREADS;
use mapcache_db::{MapCacheRepository, SharedStore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::MapCacheConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::JobQueue;
use crate::role::{self, RoleGate};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::shutdown;
use crate::synchronizer::CacheSynchronizer;
use crate::trigger::OnDemandTrigger;
use crate::worker::{WorkerConfig, WorkerContext, WorkerPool};

/// Snapshot of the service state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub workers: usize,
    /// Jobs waiting in the queue.
    pub pending: usize,
    /// Jobs a worker is running right now.
    pub in_flight: usize,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    workers: WorkerPool,
}

/// The scheduling and synchronization core.
pub struct MapCacheService {
    store: SharedStore,
    repo: MapCacheRepository,
    queue: Arc<JobQueue>,
    synchronizer: CacheSynchronizer,
    gate: Arc<dyn RoleGate>,
    config: MapCacheConfig,
    running: Option<Running>,
}

impl MapCacheService {
    pub fn builder(store: SharedStore) -> MapCacheServiceBuilder {
        MapCacheServiceBuilder::new(store)
    }

    /// Spawns the scheduler and the worker pool.
    ///
    /// ## Errors
    /// * `SyncError::InvalidState` - already running
    /// * `SyncError::Startup` - no store session could be opened
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.running.is_some() {
            return Err(SyncError::InvalidState("map cache service already running".into()));
        }

        self.store
            .read()
            .await
            .map_err(|e| SyncError::Startup(e.to_string()))?;

        let worker_count = match self.repo.worker_threads().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to read worker-threads, using {}", DEFAULT_WORKER_THREADS);
                DEFAULT_WORKER_THREADS
            }
        };

        info!(
            workers = worker_count,
            role_gate = %self.config.ha.role_gate,
            tick_secs = self.config.scheduler.tick_interval_secs,
            "Starting map cache service"
        );

        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let scheduler = Scheduler::new(
            self.repo.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.gate),
            SchedulerConfig::from(&self.config),
        );
        let scheduler = tokio::spawn(scheduler.run(shutdown_rx.clone()));

        let ctx = WorkerContext {
            queue: Arc::clone(&self.queue),
            synchronizer: self.synchronizer.clone(),
            gate: Arc::clone(&self.gate),
            config: WorkerConfig::from(&self.config),
        };
        let workers = WorkerPool::spawn(worker_count, ctx, shutdown_rx);

        self.running = Some(Running {
            shutdown_tx,
            scheduler,
            workers,
        });

        info!("Map cache service started");
        Ok(())
    }

    /// Stops every task and waits for all of them.
    ///
    /// Calling it on a stopped service does nothing.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        let Some(running) = self.running.take() else {
            debug!("Map cache service not running");
            return Ok(());
        };

        info!("Shutting down map cache service");
        let _ = running.shutdown_tx.send(true);

        if let Err(e) = running.scheduler.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
        let panicked = running.workers.join().await;

        info!(panicked, "Map cache service stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            running: self.running.is_some(),
            workers: self.running.as_ref().map_or(0, |r| r.workers.len()),
            pending: self.queue.len(),
            in_flight: self.queue.in_flight(),
        }
    }

    /// On-demand trigger sharing this service's synchronizer.
    pub fn trigger(&self) -> OnDemandTrigger {
        OnDemandTrigger::new(self.synchronizer.clone())
    }

    /// The queue the scheduler feeds.
    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::clone(&self.queue)
    }

    pub fn repository(&self) -> &MapCacheRepository {
        &self.repo
    }
}

impl Drop for MapCacheService {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            // Tasks stop on their own; nobody is left to join them.
            let _ = running.shutdown_tx.send(true);
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`MapCacheService`].
pub struct MapCacheServiceBuilder {
    store: SharedStore,
    config: MapCacheConfig,
    gate: Option<Arc<dyn RoleGate>>,
}

impl MapCacheServiceBuilder {
    pub fn new(store: SharedStore) -> Self {
        MapCacheServiceBuilder {
            store,
            config: MapCacheConfig::default(),
            gate: None,
        }
    }

    pub fn with_config(mut self, config: MapCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the gate selected by `config.ha.role_gate`.
    pub fn with_role_gate(mut self, gate: Arc<dyn RoleGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Builds the service in the stopped state.
    pub fn build(self) -> SyncResult<MapCacheService> {
        self.config.validate()?;

        let gate = self
            .gate
            .unwrap_or_else(|| role::from_kind(self.config.ha.role_gate, Arc::clone(&self.store)));

        Ok(MapCacheService {
            repo: MapCacheRepository::new(Arc::clone(&self.store)),
            queue: Arc::new(JobQueue::new()),
            synchronizer: CacheSynchronizer::new(Arc::clone(&self.store)),
            store: self.store,
            gate,
            config: self.config,
            running: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{HaRole, WatchRoleGate};
    use crate::test_support::{interface_mapping, set_source_rows, FaultyStore};
    use mapcache_core::SyncTarget;
    use mapcache_db::MemoryStore;
    use std::time::Duration;

    fn fast_config() -> MapCacheConfig {
        let mut config = MapCacheConfig::default();
        config.database.path = ":memory:".into();
        config.workers.poll_timeout_ms = 20;
        config
    }

    fn service(store: SharedStore) -> MapCacheService {
        MapCacheService::builder(store)
            .with_config(fast_config())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let memory = MemoryStore::new();
        let mut service = service(Arc::new(memory.clone()));
        service.repository().set_worker_threads(3).await.unwrap();

        service.start().await.unwrap();
        let status = service.status();
        assert!(status.running);
        assert_eq!(status.workers, 3);

        tokio::time::timeout(Duration::from_secs(2), service.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert!(!service.is_running());
        assert_eq!(service.status(), ServiceStatus::default());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut service = service(Arc::new(MemoryStore::new()));
        service.start().await.unwrap();

        assert!(matches!(service.start().await, Err(SyncError::InvalidState(_))));

        service.shutdown().await.unwrap();
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_without_session() {
        let faulty = FaultyStore::new(MemoryStore::new());
        faulty.fail_reads(true);
        let mut service = service(Arc::new(faulty));

        assert!(matches!(service.start().await, Err(SyncError::Startup(_))));
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_due_binding_is_synchronized_after_start() {
        let memory = MemoryStore::new();
        set_source_rows(&memory, "dev1", &[("r1", "10"), ("r2", "20")]).await;
        let mut service = service(Arc::new(memory.clone()));
        let repo = service.repository().clone();
        repo.upsert_mapping(&interface_mapping(), Some(60)).await.unwrap();
        repo.add_device(&interface_mapping(), "dev1", None).await.unwrap();
        repo.set_enabled(true).await.unwrap();

        service.start().await.unwrap();

        let target = SyncTarget::new(interface_mapping(), "dev1");
        let mut stats = None;
        for _ in 0..200 {
            stats = repo.poll_stats(&target).await.unwrap();
            if stats.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.shutdown().await.unwrap();

        assert_eq!(stats.map(|s| s.entries_polled), Some(2));
        assert_eq!(repo.cache_table(&target).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_service_writes_nothing() {
        let memory = MemoryStore::new();
        set_source_rows(&memory, "dev1", &[("r1", "10")]).await;
        let (_role_tx, gate) = WatchRoleGate::channel(HaRole::Secondary);
        let mut service = MapCacheService::builder(Arc::new(memory.clone()))
            .with_config(fast_config())
            .with_role_gate(Arc::new(gate))
            .build()
            .unwrap();
        let repo = service.repository().clone();
        repo.upsert_mapping(&interface_mapping(), Some(60)).await.unwrap();
        repo.add_device(&interface_mapping(), "dev1", None).await.unwrap();
        repo.set_enabled(true).await.unwrap();
        let before = memory.dump(mapcache_core::schema::ROOT);

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.shutdown().await.unwrap();

        assert_eq!(memory.dump(mapcache_core::schema::ROOT), before);
    }

    #[tokio::test]
    async fn test_trigger_works_while_stopped() {
        let memory = MemoryStore::new();
        set_source_rows(&memory, "dev1", &[("r1", "10")]).await;
        let service = service(Arc::new(memory));

        let output = service
            .trigger()
            .populate("/if/interface/name", "/if/interface/mtu", "dev1")
            .await;
        assert!(output.success, "{}", output.message);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = fast_config();
        config.scheduler.tick_interval_secs = 0;
        let result = MapCacheService::builder(Arc::new(MemoryStore::new()))
            .with_config(config)
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
