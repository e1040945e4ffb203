//! # Scheduler
//!
//! Periodic sweep that enqueues every binding whose update interval has
//! elapsed.
//!
//! ## Tick
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Scheduler Tick                               │
//! │                                                                         │
//! │  role gate inactive ──────────────► RoleInactive  (wait backoff)       │
//! │        │ active                                                         │
//! │        ▼                                                                │
//! │  /map-cache/enabled false ────────► Disabled      (wait tick)          │
//! │        │ true                                                           │
//! │        ▼                                                                │
//! │  queue has pending jobs ──────────► Backpressure  (wait tick)          │
//! │        │ empty                                                          │
//! │        ▼                                                                │
//! │  for every (mapping, device):                                          │
//! │     never polled, or now > start-timestamp + interval                  │
//! │        └── enqueue(priority 1)                                         │
//! │        ▼                                                                │
//! │  Swept { considered, queued, coalesced }   (wait tick)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sweep is coarse: a binding with an interval shorter than the tick
//! interval is refreshed at the tick cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mapcache_core::time::format_timestamp;
use mapcache_core::Job;
use mapcache_db::MapCacheRepository;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::MapCacheConfig;
use crate::queue::{Enqueued, JobQueue};
use crate::role::RoleGate;
use crate::shutdown;

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wait between ticks while active.
    pub tick_interval: Duration,
    /// Wait between role checks while inactive.
    pub inactive_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(30),
            inactive_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&MapCacheConfig> for SchedulerConfig {
    fn from(config: &MapCacheConfig) -> Self {
        SchedulerConfig {
            tick_interval: config.tick_interval(),
            inactive_backoff: config.inactive_backoff(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not holding the write role; nothing enqueued.
    RoleInactive,
    /// Periodic synchronization is switched off.
    Disabled,
    /// Jobs from an earlier sweep are still waiting; nothing enqueued.
    Backpressure { pending: usize },
    /// Due check ran over every binding.
    Swept {
        considered: usize,
        queued: usize,
        coalesced: usize,
        started_at: DateTime<Utc>,
    },
}

impl TickOutcome {
    /// Jobs added to the queue by this tick.
    pub fn queued(&self) -> usize {
        match self {
            TickOutcome::Swept { queued, .. } => *queued,
            _ => 0,
        }
    }
}

/// Produces periodic jobs.
pub struct Scheduler {
    repo: MapCacheRepository,
    queue: Arc<JobQueue>,
    gate: Arc<dyn RoleGate>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        repo: MapCacheRepository,
        queue: Arc<JobQueue>,
        gate: Arc<dyn RoleGate>,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler {
            repo,
            queue,
            gate,
            config,
        }
    }

    /// Runs one tick at the current time.
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Runs one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.gate.is_active().await {
            debug!("Role inactive, not scheduling");
            return TickOutcome::RoleInactive;
        }

        match self.repo.enabled().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Map cache disabled, not scheduling");
                return TickOutcome::Disabled;
            }
            Err(e) => {
                error!(error = %e, "Failed to read enabled flag, not scheduling");
                return TickOutcome::Disabled;
            }
        }

        let pending = self.queue.len();
        if pending > 0 {
            info!(pending, "Queue not yet drained, skipping sweep");
            return TickOutcome::Backpressure { pending };
        }

        let bindings = match self.repo.bindings().await {
            Ok(bindings) => bindings,
            Err(e) => {
                error!(error = %e, "Failed to read mapping definitions");
                return TickOutcome::Swept {
                    considered: 0,
                    queued: 0,
                    coalesced: 0,
                    started_at: now,
                };
            }
        };

        let mut queued = 0;
        let mut coalesced = 0;
        for binding in bindings.iter().filter(|b| b.is_due(&now)) {
            match self.queue.enqueue(Job::periodic(binding.target.clone())) {
                Enqueued::Queued => {
                    debug!(binding = %binding.target, "Binding due");
                    queued += 1;
                }
                Enqueued::Coalesced => coalesced += 1,
            }
        }

        info!(
            considered = bindings.len(),
            coalesced,
            started_at = %format_timestamp(&now),
            "Queued up {} jobs",
            queued
        );

        TickOutcome::Swept {
            considered: bindings.len(),
            queued,
            coalesced,
            started_at: now,
        }
    }

    /// Ticks until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow_and_update() {
            return;
        }

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            backoff_secs = self.config.inactive_backoff.as_secs(),
            "Scheduler started"
        );

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown_rx) => break,
                outcome = self.tick() => outcome,
            };

            let wait = match outcome {
                TickOutcome::RoleInactive => self.config.inactive_backoff,
                _ => self.config.tick_interval,
            };

            if shutdown::sleep_or_shutdown(&mut shutdown_rx, wait).await {
                break;
            }
        }

        info!("Scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{HaRole, Standalone, WatchRoleGate};
    use crate::test_support::{interface_mapping, FaultyStore};
    use chrono::TimeZone;
    use mapcache_core::schema::{self, leaf};
    use mapcache_core::SyncTarget;
    use mapcache_db::{DataStore, MemoryStore, SharedStore};

    struct Fixture {
        memory: MemoryStore,
        faulty: FaultyStore,
        repo: MapCacheRepository,
        queue: Arc<JobQueue>,
    }

    async fn fixture(devices: &[&str], interval: u64) -> Fixture {
        let memory = MemoryStore::new();
        let faulty = FaultyStore::new(memory.clone());
        let store: SharedStore = Arc::new(faulty.clone());
        let repo = MapCacheRepository::new(store);

        repo.set_enabled(true).await.unwrap();
        repo.upsert_mapping(&interface_mapping(), Some(interval)).await.unwrap();
        for device in devices {
            repo.add_device(&interface_mapping(), device, None).await.unwrap();
        }

        Fixture {
            memory,
            faulty,
            repo,
            queue: Arc::new(JobQueue::new()),
        }
    }

    impl Fixture {
        fn scheduler(&self, gate: Arc<dyn RoleGate>) -> Scheduler {
            Scheduler::new(
                self.repo.clone(),
                Arc::clone(&self.queue),
                gate,
                SchedulerConfig::default(),
            )
        }

        async fn set_last_start(&self, device: &str, start: DateTime<Utc>) {
            let target = SyncTarget::new(interface_mapping(), device);
            let path = leaf(&schema::stats_path(&target), schema::START_TIMESTAMP);
            let mut tx = self.memory.write().await.unwrap();
            tx.put(&path, &format_timestamp(&start)).await.unwrap();
            tx.commit().await.unwrap();
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_never_polled_bindings_are_queued() {
        let fx = fixture(&["dev1", "dev2"], 60).await;
        let outcome = fx.scheduler(Arc::new(Standalone)).tick_at(t0()).await;

        assert_eq!(
            outcome,
            TickOutcome::Swept {
                considered: 2,
                queued: 2,
                coalesced: 0,
                started_at: t0(),
            }
        );
        assert_eq!(fx.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_due_only_strictly_after_interval() {
        let fx = fixture(&["dev1"], 60).await;
        fx.set_last_start("dev1", t0()).await;
        let scheduler = fx.scheduler(Arc::new(Standalone));

        let at_boundary = t0() + chrono::Duration::seconds(60);
        assert_eq!(scheduler.tick_at(at_boundary).await.queued(), 0);

        let past_boundary = t0() + chrono::Duration::seconds(61);
        assert_eq!(scheduler.tick_at(past_boundary).await.queued(), 1);
    }

    #[tokio::test]
    async fn test_device_override_interval_is_used() {
        let fx = fixture(&[], 600).await;
        fx.repo
            .add_device(&interface_mapping(), "dev1", Some(10))
            .await
            .unwrap();
        fx.set_last_start("dev1", t0()).await;

        let outcome = fx
            .scheduler(Arc::new(Standalone))
            .tick_at(t0() + chrono::Duration::seconds(11))
            .await;
        assert_eq!(outcome.queued(), 1);
    }

    #[tokio::test]
    async fn test_non_empty_queue_blocks_sweep() {
        let fx = fixture(&["dev1", "dev2", "dev3"], 60).await;
        fx.queue.enqueue(Job::periodic(SyncTarget::new(interface_mapping(), "other")));

        let outcome = fx.scheduler(Arc::new(Standalone)).tick_at(t0()).await;

        assert_eq!(outcome, TickOutcome::Backpressure { pending: 1 });
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_binding_is_coalesced() {
        let fx = fixture(&["dev1", "dev2"], 60).await;
        fx.queue.enqueue(Job::periodic(SyncTarget::new(interface_mapping(), "dev1")));
        let _lease = fx.queue.try_dequeue().unwrap();

        let outcome = fx.scheduler(Arc::new(Standalone)).tick_at(t0()).await;

        assert_eq!(
            outcome,
            TickOutcome::Swept {
                considered: 2,
                queued: 1,
                coalesced: 1,
                started_at: t0(),
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_enqueues_nothing() {
        let fx = fixture(&["dev1"], 60).await;
        fx.repo.set_enabled(false).await.unwrap();

        let outcome = fx.scheduler(Arc::new(Standalone)).tick_at(t0()).await;

        assert_eq!(outcome, TickOutcome::Disabled);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_role_enqueues_and_touches_nothing() {
        let fx = fixture(&["dev1"], 60).await;
        let (_role_tx, gate) = WatchRoleGate::channel(HaRole::Secondary);
        let calls_before = fx.faulty.calls();
        let before = fx.memory.dump(schema::ROOT);

        let outcome = fx.scheduler(Arc::new(gate)).tick_at(t0()).await;

        assert_eq!(outcome, TickOutcome::RoleInactive);
        assert!(fx.queue.is_empty());
        assert_eq!(fx.faulty.calls(), calls_before);
        assert_eq!(fx.memory.dump(schema::ROOT), before);
    }

    #[tokio::test]
    async fn test_unreadable_config_sweeps_nothing() {
        let fx = fixture(&["dev1"], 60).await;
        let scheduler = fx.scheduler(Arc::new(Standalone));
        fx.faulty.fail_reads(true);

        assert_eq!(scheduler.tick_at(t0()).await, TickOutcome::Disabled);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_immediately_and_stops_on_shutdown() {
        let fx = fixture(&["dev1"], 60).await;
        let scheduler = fx.scheduler(Arc::new(Standalone));
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.queue.len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    /// Gate that is never active and counts how often it was asked.
    #[derive(Default)]
    struct CountingGate {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl RoleGate for CountingGate {
        fn is_active(&self) -> crate::role::GateFuture<'_> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async { false })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_role_waits_backoff_not_tick_interval() {
        let fx = fixture(&["dev1"], 60).await;
        let gate = Arc::new(CountingGate::default());
        let calls = || gate.calls.load(std::sync::atomic::Ordering::SeqCst);
        let scheduler = fx.scheduler(Arc::clone(&gate) as Arc<dyn RoleGate>);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // Past one tick interval (30 s) but short of the backoff (60 s).
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls(), 2);
        assert!(fx.queue.is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
