//! # On-Demand Trigger
//!
//! Synchronous "refresh now" entry point. Runs the synchronizer directly,
//! without going through the job queue, and reports the outcome to the
//! caller.

use mapcache_core::{MappingKey, SyncTarget};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::synchronizer::CacheSynchronizer;

/// Result reported to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateOutput {
    pub success: bool,
    pub message: String,
}

/// Runs one synchronization per request.
#[derive(Debug, Clone)]
pub struct OnDemandTrigger {
    synchronizer: CacheSynchronizer,
}

impl OnDemandTrigger {
    pub fn new(synchronizer: CacheSynchronizer) -> Self {
        Self { synchronizer }
    }

    /// Refreshes the cache table of (`key_selector`, `value_selector`) on
    /// `device`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let output = trigger.populate("/if/interface/name", "/if/interface/mtu", "edge-1").await;
    /// if !output.success {
    ///     eprintln!("{}", output.message);
    /// }
    /// ```
    pub async fn populate(&self, key_selector: &str, value_selector: &str, device: &str) -> PopulateOutput {
        let target = SyncTarget::new(MappingKey::new(key_selector, value_selector), device);
        info!(binding = %target, "On-demand populate requested");

        match self.synchronizer.run(&target).await {
            Ok(stats) => PopulateOutput {
                success: true,
                message: format!(
                    "populated {} entries for {} (duration {})",
                    stats.entries_polled, target, stats.duration
                ),
            },
            Err(e) => {
                warn!(binding = %target, error = %e, "On-demand populate failed");
                PopulateOutput {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{set_source_rows, FaultyStore};
    use mapcache_core::schema;
    use mapcache_db::{MapCacheRepository, MemoryStore, SharedStore};
    use std::sync::Arc;

    fn trigger(store: &MemoryStore) -> (FaultyStore, OnDemandTrigger) {
        let faulty = FaultyStore::new(store.clone());
        let shared: SharedStore = Arc::new(faulty.clone());
        (faulty, OnDemandTrigger::new(CacheSynchronizer::new(shared)))
    }

    #[tokio::test]
    async fn test_populate_success() {
        let store = MemoryStore::new();
        set_source_rows(&store, "dev1", &[("r1", "10"), ("r2", "20")]).await;
        let (_, trigger) = trigger(&store);

        let output = trigger
            .populate("/if/interface/name", "/if/interface/mtu", "dev1")
            .await;

        assert!(output.success);
        assert!(output.message.starts_with("populated 2 entries"));

        let repo = MapCacheRepository::new(Arc::new(store));
        let target = SyncTarget::new(
            MappingKey::new("/if/interface/name", "/if/interface/mtu"),
            "dev1",
        );
        assert_eq!(repo.cache_table(&target).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_populate_invalid_mapping_reports_failure() {
        let store = MemoryStore::new();
        let (faulty, trigger) = trigger(&store);

        let output = trigger.populate("/a/b/k", "/a/c/v", "dev1").await;

        assert!(!output.success);
        assert!(output.message.contains("same table"));
        assert_eq!(faulty.calls(), 0);
    }

    #[tokio::test]
    async fn test_populate_commit_failure_is_never_success() {
        let store = MemoryStore::new();
        set_source_rows(&store, "dev1", &[("r1", "10")]).await;
        let (faulty, trigger) = trigger(&store);
        faulty.fail_commits(true);

        let output = trigger
            .populate("/if/interface/name", "/if/interface/mtu", "dev1")
            .await;

        assert!(!output.success);
        assert!(store.dump(schema::ROOT).is_empty());
    }

    #[tokio::test]
    async fn test_populate_runs_exactly_once() {
        let store = MemoryStore::new();
        set_source_rows(&store, "dev1", &[("r1", "10")]).await;
        let (faulty, trigger) = trigger(&store);

        trigger
            .populate("/if/interface/name", "/if/interface/mtu", "dev1")
            .await;

        // One read transaction for the snapshot, one write transaction.
        assert_eq!(faulty.calls(), 2);
    }
}
