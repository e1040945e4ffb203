//! # Cache Synchronizer
//!
//! Refreshes the cache table of one (mapping, device) binding from its
//! source rows.
//!
//! ## Run Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CacheSynchronizer::run                             │
//! │                                                                         │
//! │  1. validate mapping + device ──── fail ──► InvalidMapping (no I/O)    │
//! │                                                                         │
//! │  2. start = now                                                        │
//! │                                                                         │
//! │  3. READ TX (one snapshot)                                             │
//! │     /devices/device[name=D]/live-status<key-selector>                  │
//! │       └── for each key leaf: sibling value leaf                        │
//! │     ──── fail ──► SourceRead (nothing written)                         │
//! │                                                                         │
//! │  4. end = now                                                          │
//! │                                                                         │
//! │  5. WRITE TX                                                           │
//! │     a. mapping + device nodes                                          │
//! │     b. delete entries whose key left the snapshot                      │
//! │     c. put every snapshot entry                                        │
//! │     d. last-poll-stats                                                 │
//! │     e. commit ──── fail ──► SyncWrite (transaction discarded)          │
//! │                                                                         │
//! │  6. return PollStats                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The read and the write are separate transactions. The snapshot may be a
//! little older than the moment it is written.

use chrono::Utc;
use tracing::{debug, info};

use mapcache_core::schema::{self, leaf};
use mapcache_core::selector::parent_path;
use mapcache_core::time::format_timestamp;
use mapcache_core::validation::{validate_device, validate_list_key};
use mapcache_core::{CoreError, PollStats, Snapshot, SyncTarget, DEFAULT_UPDATE_INTERVAL_SECS};
use mapcache_db::{DbResult, SharedStore, WriteTransaction};

use crate::error::{SyncError, SyncResult};

/// Synchronizes one binding at a time. Cheap to clone.
#[derive(Clone)]
pub struct CacheSynchronizer {
    store: SharedStore,
}

impl CacheSynchronizer {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Refreshes the cache table of `target` and records its poll stats.
    ///
    /// ## Returns
    /// The stats that were written.
    ///
    /// ## Errors
    /// * `SyncError::InvalidMapping` - selectors are not siblings, or the
    ///   device name is unusable. The store is not touched.
    /// * `SyncError::SourceRead` - the source could not be read
    /// * `SyncError::SyncWrite` - the cache could not be written; no part of
    ///   the write is kept
    pub async fn run(&self, target: &SyncTarget) -> SyncResult<PollStats> {
        target.mapping.validate()?;
        validate_list_key(schema::KEY_XPATH, &target.mapping.key_selector).map_err(CoreError::from)?;
        validate_list_key(schema::VALUE_XPATH, &target.mapping.value_selector).map_err(CoreError::from)?;
        validate_device(&target.device).map_err(CoreError::from)?;

        let start = Utc::now();
        let snapshot = self.fetch(target).await?;
        let end = Utc::now();

        let stats = PollStats::new(start, end, snapshot.len());

        self.store_snapshot(target, &snapshot, &stats)
            .await
            .map_err(|e| SyncError::SyncWrite {
                target: target.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            binding = %target,
            entries = stats.entries_polled,
            duration = stats.duration,
            "Cache table refreshed"
        );
        Ok(stats)
    }

    /// Reads the source rows of `target` in one read transaction.
    async fn fetch(&self, target: &SyncTarget) -> SyncResult<Snapshot> {
        let source_error = |reason: String| SyncError::SourceRead {
            device: target.device.clone(),
            reason,
        };

        let value_leaf = target
            .mapping
            .value_leaf()
            .ok_or_else(|| CoreError::invalid_mapping(
                &target.mapping.key_selector,
                &target.mapping.value_selector,
                "value selector has no leaf step",
            ))?;

        let mut tx = self
            .store
            .read()
            .await
            .map_err(|e| source_error(e.to_string()))?;
        let tx = tx.as_mut();

        let selector = schema::source_key_selector(target);
        let rows = tx
            .select(&selector)
            .await
            .map_err(|e| source_error(e.to_string()))?;

        let mut snapshot = Snapshot::new();
        for (key_path, key) in rows {
            let Some(value_path) = schema::sibling_path(&key_path, &value_leaf) else {
                return Err(source_error(format!("row {} has no parent", key_path)));
            };
            let value = tx
                .get(&value_path)
                .await
                .map_err(|e| source_error(e.to_string()))?
                .ok_or_else(|| source_error(format!("row has no value at {}", value_path)))?;
            snapshot.insert(key, value);
        }

        debug!(binding = %target, rows = snapshot.len(), "Source snapshot read");
        Ok(snapshot)
    }

    /// Replaces the cache table and poll stats of `target` in one write
    /// transaction.
    async fn store_snapshot(
        &self,
        target: &SyncTarget,
        snapshot: &Snapshot,
        stats: &PollStats,
    ) -> DbResult<()> {
        let mut tx = self.store.write().await?;

        ensure_binding(tx.as_mut(), target).await?;

        let mut removed = 0usize;
        for (key_path, key) in tx.select(&schema::entry_keys_selector(target)).await? {
            if snapshot.contains_key(&key) {
                continue;
            }
            if let Some(entry) = parent_path(&key_path) {
                tx.delete(entry).await?;
                removed += 1;
            }
        }

        for (key, value) in snapshot.iter() {
            let entry = schema::entry_path(target, key);
            tx.put(&leaf(&entry, schema::ENTRY_KEY), key).await?;
            tx.put(&leaf(&entry, schema::ENTRY_VALUE), value).await?;
        }

        let stats_path = schema::stats_path(target);
        tx.put(
            &leaf(&stats_path, schema::START_TIMESTAMP),
            &format_timestamp(&stats.start_timestamp),
        )
        .await?;
        tx.put(
            &leaf(&stats_path, schema::END_TIMESTAMP),
            &format_timestamp(&stats.end_timestamp),
        )
        .await?;
        tx.put(&leaf(&stats_path, schema::DURATION), &stats.duration.to_string())
            .await?;
        tx.put(
            &leaf(&stats_path, schema::ENTRIES_POLLED),
            &stats.entries_polled.to_string(),
        )
        .await?;

        tx.commit().await?;

        debug!(binding = %target, removed, written = snapshot.len(), "Cache table written");
        Ok(())
    }
}

impl std::fmt::Debug for CacheSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSynchronizer").finish_non_exhaustive()
    }
}

/// Creates the mapping and device nodes of `target` if they are missing.
async fn ensure_binding(tx: &mut dyn WriteTransaction, target: &SyncTarget) -> DbResult<()> {
    let mapping = schema::mapping_path(&target.mapping);
    tx.put(&leaf(&mapping, schema::KEY_XPATH), &target.mapping.key_selector)
        .await?;
    tx.put(&leaf(&mapping, schema::VALUE_XPATH), &target.mapping.value_selector)
        .await?;

    let interval = leaf(&mapping, schema::UPDATE_INTERVAL);
    if !tx.exists(&interval).await? {
        tx.put(&interval, &DEFAULT_UPDATE_INTERVAL_SECS.to_string())
            .await?;
    }

    let device = schema::device_path(target);
    tx.put(&leaf(&device, schema::DEVICE_NAME), &target.device)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{interface_mapping, set_source_rows, FaultyStore};
    use mapcache_core::MappingKey;
    use mapcache_db::{DataStore, MapCacheRepository, MemoryStore};
    use std::sync::Arc;

    fn setup() -> (MemoryStore, FaultyStore, CacheSynchronizer, MapCacheRepository) {
        let memory = MemoryStore::new();
        let faulty = FaultyStore::new(memory.clone());
        let store: SharedStore = Arc::new(faulty.clone());
        (
            memory,
            faulty,
            CacheSynchronizer::new(Arc::clone(&store)),
            MapCacheRepository::new(store),
        )
    }

    fn dev1() -> SyncTarget {
        SyncTarget::new(interface_mapping(), "dev1")
    }

    fn table(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_first_and_second_run_reconcile_table() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("r1", "10"), ("r2", "20")]).await;

        let stats = sync.run(&dev1()).await.unwrap();
        assert_eq!(stats.entries_polled, 2);
        assert!(stats.start_timestamp <= stats.end_timestamp);
        assert_eq!(
            repo.cache_table(&dev1()).await.unwrap(),
            table(&[("r1", "10"), ("r2", "20")])
        );

        set_source_rows(&memory, "dev1", &[("r2", "99"), ("r3", "30")]).await;
        let stats = sync.run(&dev1()).await.unwrap();
        assert_eq!(stats.entries_polled, 2);
        assert_eq!(
            repo.cache_table(&dev1()).await.unwrap(),
            table(&[("r2", "99"), ("r3", "30")])
        );
        assert_eq!(repo.poll_stats(&dev1()).await.unwrap(), Some(stats));
    }

    #[tokio::test]
    async fn test_repeated_run_is_idempotent() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("eth0", "1500"), ("eth1", "9000")]).await;

        let first = sync.run(&dev1()).await.unwrap();
        let table_after_first = repo.cache_table(&dev1()).await.unwrap();
        let second = sync.run(&dev1()).await.unwrap();

        assert_eq!(repo.cache_table(&dev1()).await.unwrap(), table_after_first);
        assert_eq!(first.entries_polled, second.entries_polled);
        assert!(second.start_timestamp >= first.start_timestamp);
    }

    #[tokio::test]
    async fn test_run_creates_mapping_and_device_nodes() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("eth0", "1500")]).await;

        sync.run(&dev1()).await.unwrap();

        let definitions = repo.definitions().await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].mapping, interface_mapping());
        assert_eq!(definitions[0].update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);
        assert_eq!(definitions[0].devices[0].device, "dev1");
        assert!(definitions[0].devices[0].last_start.is_some());
    }

    #[tokio::test]
    async fn test_configured_interval_is_kept() {
        let (memory, _, sync, repo) = setup();
        repo.upsert_mapping(&interface_mapping(), Some(42)).await.unwrap();
        set_source_rows(&memory, "dev1", &[("eth0", "1500")]).await;

        sync.run(&dev1()).await.unwrap();

        let definitions = repo.definitions().await.unwrap();
        assert_eq!(definitions[0].update_interval_secs, 42);
    }

    #[tokio::test]
    async fn test_empty_source_clears_table() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("eth0", "1500")]).await;
        sync.run(&dev1()).await.unwrap();

        set_source_rows(&memory, "dev1", &[]).await;
        let stats = sync.run(&dev1()).await.unwrap();

        assert_eq!(stats.entries_polled, 0);
        assert!(repo.cache_table(&dev1()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sibling_check_fails_without_store_calls() {
        let (_, faulty, sync, _) = setup();
        let target = SyncTarget::new(MappingKey::new("/a/b/k", "/a/c/v"), "dev1");

        let err = sync.run(&target).await.unwrap_err();

        assert!(matches!(err, SyncError::InvalidMapping(_)));
        assert!(!err.is_retryable());
        assert_eq!(faulty.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_device_name_fails_without_store_calls() {
        let (_, faulty, sync, _) = setup();
        let target = SyncTarget::new(interface_mapping(), "");

        assert!(matches!(sync.run(&target).await, Err(SyncError::InvalidMapping(_))));
        assert_eq!(faulty.calls(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_writes_nothing() {
        let (memory, faulty, sync, _) = setup();
        set_source_rows(&memory, "dev1", &[("eth0", "1500")]).await;
        let before = memory.dump(schema::ROOT);

        faulty.fail_reads(true);
        let err = sync.run(&dev1()).await.unwrap_err();

        assert!(matches!(err, SyncError::SourceRead { .. }));
        assert_eq!(memory.dump(schema::ROOT), before);
    }

    #[tokio::test]
    async fn test_row_without_value_is_a_source_error() {
        let (memory, _, sync, repo) = setup();
        let root = schema::live_status_root("dev1");
        let mut tx = memory.write().await.unwrap();
        tx.put(&format!("{}/if/interface[name='eth0']/name", root), "eth0")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let err = sync.run(&dev1()).await.unwrap_err();

        assert!(matches!(err, SyncError::SourceRead { .. }));
        assert!(repo.poll_stats(&dev1()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_state_unchanged() {
        let (memory, faulty, sync, _) = setup();
        set_source_rows(&memory, "dev1", &[("r1", "10"), ("r2", "20")]).await;
        sync.run(&dev1()).await.unwrap();
        let before = memory.dump(schema::ROOT);

        set_source_rows(&memory, "dev1", &[("r2", "99"), ("r3", "30")]).await;
        faulty.fail_commits(true);
        let err = sync.run(&dev1()).await.unwrap_err();

        assert!(matches!(err, SyncError::SyncWrite { .. }));
        assert!(err.is_retryable());
        assert_eq!(memory.dump(schema::ROOT), before);
    }

    #[tokio::test]
    async fn test_other_devices_are_untouched() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("eth0", "1500")]).await;
        set_source_rows(&memory, "dev2", &[("ge0", "9000")]).await;
        let dev2 = SyncTarget::new(interface_mapping(), "dev2");

        sync.run(&dev1()).await.unwrap();
        sync.run(&dev2).await.unwrap();
        set_source_rows(&memory, "dev1", &[]).await;
        sync.run(&dev1()).await.unwrap();

        assert_eq!(repo.cache_table(&dev2).await.unwrap(), table(&[("ge0", "9000")]));
    }

    #[tokio::test]
    async fn test_key_containing_slash() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("Gi0/1", "1500")]).await;

        sync.run(&dev1()).await.unwrap();
        assert_eq!(repo.cache_table(&dev1()).await.unwrap(), table(&[("Gi0/1", "1500")]));
    }

    #[tokio::test]
    async fn test_key_with_apostrophe_round_trips() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("it's", "1500"), ("eth0", "9000")]).await;

        sync.run(&dev1()).await.unwrap();
        assert_eq!(
            repo.cache_table(&dev1()).await.unwrap(),
            table(&[("it's", "1500"), ("eth0", "9000")])
        );

        set_source_rows(&memory, "dev1", &[("eth0", "9000")]).await;
        sync.run(&dev1()).await.unwrap();
        assert_eq!(repo.cache_table(&dev1()).await.unwrap(), table(&[("eth0", "9000")]));
    }

    #[tokio::test]
    async fn test_key_with_both_quote_characters_is_reconciled() {
        let (memory, _, sync, repo) = setup();
        set_source_rows(&memory, "dev1", &[("a'b\"c", "10")]).await;

        let stats = sync.run(&dev1()).await.unwrap();
        assert_eq!(stats.entries_polled, 1);
        assert_eq!(repo.cache_table(&dev1()).await.unwrap(), table(&[("a'b\"c", "10")]));

        set_source_rows(&memory, "dev1", &[]).await;
        sync.run(&dev1()).await.unwrap();

        assert!(repo.cache_table(&dev1()).await.unwrap().is_empty());
        let leftovers: Vec<_> = memory
            .dump(schema::ROOT)
            .into_iter()
            .filter(|(path, _)| path.contains("/entry["))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[tokio::test]
    async fn test_blank_selector_fails_without_store_calls() {
        let (_, faulty, sync, _) = setup();
        let target = SyncTarget::new(MappingKey::new("   ", "/if/interface/mtu"), "dev1");

        assert!(matches!(sync.run(&target).await, Err(SyncError::InvalidMapping(_))));
        assert_eq!(faulty.calls(), 0);
    }
}
