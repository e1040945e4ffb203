//! # Worker Pool
//!
//! N identical workers consuming the job queue.
//!
//! ## Worker Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Worker Loop                                   │
//! │                                                                         │
//! │   ┌──────────────┐  inactive   ┌──────────────────────┐                │
//! │   │ gate check   │────────────►│ sleep inactive       │──┐             │
//! │   └──────┬───────┘             │ backoff              │  │             │
//! │          │ active              └──────────────────────┘  │             │
//! │          ▼                                                │             │
//! │   ┌──────────────┐  timeout                               │             │
//! │   │ dequeue      │────────────────────────────────────────┤             │
//! │   │ (poll wait)  │                                        │             │
//! │   └──────┬───────┘                                        │             │
//! │          │ lease                                          │             │
//! │          ▼                                                │             │
//! │   ┌──────────────┐                                        │             │
//! │   │ synchronizer │── ok / error: log, drop lease ─────────┘             │
//! │   │ .run()       │                                                      │
//! │   └──────────────┘                                                      │
//! │                                                                         │
//! │   Shutdown interrupts every wait. A run in progress is abandoned:      │
//! │   its write transaction is dropped uncommitted.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers have no affinity: any worker takes any job. A job error never
//! stops a worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MapCacheConfig;
use crate::queue::{JobLease, JobQueue};
use crate::role::RoleGate;
use crate::shutdown;
use crate::synchronizer::CacheSynchronizer;

/// Worker timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long to wait on an empty queue before re-checking the gate.
    pub poll_timeout: Duration,
    /// Wait between role checks while inactive.
    pub inactive_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_timeout: Duration::from_secs(1),
            inactive_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&MapCacheConfig> for WorkerConfig {
    fn from(config: &MapCacheConfig) -> Self {
        WorkerConfig {
            poll_timeout: config.poll_timeout(),
            inactive_backoff: config.inactive_backoff(),
        }
    }
}

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub synchronizer: CacheSynchronizer,
    pub gate: Arc<dyn RoleGate>,
    pub config: WorkerConfig,
}

/// One consumer of the job queue.
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Worker { id, ctx }
    }

    /// Consumes jobs until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        debug!(worker = self.id, "Worker started");

        loop {
            if !self.ctx.gate.is_active().await {
                if shutdown::sleep_or_shutdown(&mut shutdown_rx, self.ctx.config.inactive_backoff).await {
                    break;
                }
                continue;
            }

            let lease = tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown_rx) => break,
                lease = self.ctx.queue.dequeue_timeout(self.ctx.config.poll_timeout) => lease,
            };

            let Some(lease) = lease else {
                continue;
            };

            let stopped = tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown_rx) => true,
                _ = self.process(&lease) => false,
            };

            if stopped {
                warn!(worker = self.id, binding = %lease.target(), "Job abandoned on shutdown");
                break;
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }

    /// Runs one job and logs how it went. The lease is released by the caller.
    async fn process(&self, lease: &JobLease) {
        let target = lease.target();
        info!(
            worker = self.id,
            binding = %target,
            priority = %lease.job().priority,
            "Picked up job"
        );

        match self.ctx.synchronizer.run(target).await {
            Ok(stats) => info!(
                worker = self.id,
                binding = %target,
                entries = stats.entries_polled,
                duration = stats.duration,
                "Job completed"
            ),
            Err(e) => error!(
                worker = self.id,
                binding = %target,
                retryable = e.is_retryable(),
                error = %e,
                "Job failed"
            ),
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A fixed set of spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers sharing `ctx`.
    pub fn spawn(count: usize, ctx: WorkerContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        let handles = (0..count)
            .map(|id| tokio::spawn(Worker::new(id, ctx.clone()).run(shutdown_rx.clone())))
            .collect();

        info!(workers = count, "Worker pool started");
        WorkerPool { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to finish.
    ///
    /// Returns the number of workers that panicked.
    pub async fn join(self) -> usize {
        let mut panicked = 0;
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = id, error = %e, "Worker task ended abnormally");
                panicked += 1;
            }
        }
        panicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{HaRole, Standalone, WatchRoleGate};
    use crate::test_support::{interface_mapping, set_source_rows};
    use mapcache_core::{Job, MappingKey, SyncTarget};
    use mapcache_db::{MapCacheRepository, MemoryStore, SharedStore};

    fn context(store: &MemoryStore, gate: Arc<dyn RoleGate>) -> WorkerContext {
        let shared: SharedStore = Arc::new(store.clone());
        WorkerContext {
            queue: Arc::new(JobQueue::new()),
            synchronizer: CacheSynchronizer::new(shared),
            gate,
            config: WorkerConfig {
                poll_timeout: Duration::from_millis(20),
                inactive_backoff: Duration::from_millis(50),
            },
        }
    }

    async fn wait_for_drain(queue: &JobQueue) {
        for _ in 0..200 {
            if queue.is_empty() && queue.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not drain");
    }

    #[tokio::test]
    async fn test_pool_runs_queued_jobs() {
        let store = MemoryStore::new();
        set_source_rows(&store, "dev1", &[("eth0", "1500")]).await;
        set_source_rows(&store, "dev2", &[("ge0", "9000")]).await;
        let ctx = context(&store, Arc::new(Standalone));
        let queue = Arc::clone(&ctx.queue);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let pool = WorkerPool::spawn(2, ctx, shutdown_rx);
        assert_eq!(pool.len(), 2);

        queue.enqueue(Job::periodic(SyncTarget::new(interface_mapping(), "dev1")));
        queue.enqueue(Job::periodic(SyncTarget::new(interface_mapping(), "dev2")));
        wait_for_drain(&queue).await;

        shutdown_tx.send(true).unwrap();
        assert_eq!(pool.join().await, 0);

        let repo = MapCacheRepository::new(Arc::new(store));
        let dev2 = SyncTarget::new(interface_mapping(), "dev2");
        assert_eq!(
            repo.cache_table(&dev2).await.unwrap(),
            vec![("ge0".to_string(), "9000".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_worker() {
        let store = MemoryStore::new();
        set_source_rows(&store, "dev1", &[("eth0", "1500")]).await;
        let ctx = context(&store, Arc::new(Standalone));
        let queue = Arc::clone(&ctx.queue);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let pool = WorkerPool::spawn(1, ctx, shutdown_rx);

        let invalid = SyncTarget::new(MappingKey::new("/a/b/k", "/a/c/v"), "dev1");
        queue.enqueue(Job::periodic(invalid));
        wait_for_drain(&queue).await;

        let valid = SyncTarget::new(interface_mapping(), "dev1");
        queue.enqueue(Job::periodic(valid.clone()));
        wait_for_drain(&queue).await;

        shutdown_tx.send(true).unwrap();
        pool.join().await;

        let repo = MapCacheRepository::new(Arc::new(store));
        assert!(repo.poll_stats(&valid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_inactive_worker_leaves_queue_alone() {
        let store = MemoryStore::new();
        let (role_tx, gate) = WatchRoleGate::channel(HaRole::Secondary);
        let ctx = context(&store, Arc::new(gate));
        let queue = Arc::clone(&ctx.queue);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let pool = WorkerPool::spawn(1, ctx, shutdown_rx);

        queue.enqueue(Job::periodic(SyncTarget::new(interface_mapping(), "dev1")));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(queue.len(), 1);
        assert!(store.is_empty());

        role_tx.send(HaRole::Primary).unwrap();
        wait_for_drain(&queue).await;

        shutdown_tx.send(true).unwrap();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_wakes_idle_workers() {
        let store = MemoryStore::new();
        let mut ctx = context(&store, Arc::new(Standalone));
        ctx.config.poll_timeout = Duration::from_secs(3600);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let pool = WorkerPool::spawn(3, ctx, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();

        let panicked = tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .unwrap();
        assert_eq!(panicked, 0);
    }
}
