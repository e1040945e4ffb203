//! # Map Cache Repository
//!
//! Configuration reads the scheduler depends on, plus the administrative
//! writes that create and remove mappings and device bindings.
//!
//! ## Key Operations
//! - `settings()` - global `enabled` flag and worker pool size
//! - `bindings()` - every (mapping, device) with its effective interval and
//!   last `start-timestamp`, read in one transaction
//! - `upsert_mapping()` / `add_device()` / `remove_*()` - configuration
//!   lifecycle
//! - `cache_table()` / `poll_stats()` - what a synchronization left behind

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mapcache_core::schema::{self, leaf};
use mapcache_core::selector::parent_path;
use mapcache_core::time::parse_timestamp;
use mapcache_core::validation::{
    validate_device, validate_list_key, validate_update_interval, validate_worker_threads,
};
use mapcache_core::{
    BindingState, MapCacheSettings, MappingKey, PollStats, SyncTarget, DEFAULT_UPDATE_INTERVAL_SECS,
    DEFAULT_WORKER_THREADS,
};

use crate::error::{DbError, DbResult};
use crate::store::{ReadTransaction, SharedStore};

// =============================================================================
// Views
// =============================================================================

/// A mapping definition with its device bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDefinition {
    pub mapping: MappingKey,
    /// Mapping-level update interval (seconds).
    pub update_interval_secs: u64,
    pub devices: Vec<DeviceBinding>,
}

/// One device bound to a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinding {
    pub device: String,
    /// Device-level interval override (seconds).
    pub update_interval_override: Option<u64>,
    /// `start-timestamp` of the last successful poll.
    pub last_start: Option<DateTime<Utc>>,
}

impl MappingDefinition {
    /// Flattens this definition into one [`BindingState`] per device.
    pub fn binding_states(&self) -> impl Iterator<Item = BindingState> + '_ {
        self.devices.iter().map(move |binding| BindingState {
            target: SyncTarget::new(self.mapping.clone(), binding.device.clone()),
            update_interval_secs: binding
                .update_interval_override
                .unwrap_or(self.update_interval_secs),
            last_start: binding.last_start,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository over any [`crate::DataStore`].
///
/// ## Usage
/// ```rust,ignore
/// let repo = MapCacheRepository::new(store.clone());
///
/// repo.upsert_mapping(&mapping, Some(60)).await?;
/// repo.add_device(&mapping, "edge-1", None).await?;
/// repo.set_enabled(true).await?;
///
/// for binding in repo.bindings().await? { /* ... */ }
/// ```
#[derive(Clone)]
pub struct MapCacheRepository {
    store: SharedStore,
}

impl MapCacheRepository {
    /// Creates a new MapCacheRepository.
    pub fn new(store: SharedStore) -> Self {
        MapCacheRepository { store }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Reads the global settings.
    ///
    /// Absent `enabled` means disabled; absent `worker-threads` means
    /// [`DEFAULT_WORKER_THREADS`].
    pub async fn settings(&self) -> DbResult<MapCacheSettings> {
        let mut tx = self.store.read().await?;
        let enabled = read_enabled(tx.as_mut()).await?;
        let worker_threads = read_worker_threads(tx.as_mut()).await?;
        Ok(MapCacheSettings {
            enabled,
            worker_threads,
        })
    }

    /// Reads only the global `enabled` flag.
    pub async fn enabled(&self) -> DbResult<bool> {
        let mut tx = self.store.read().await?;
        read_enabled(tx.as_mut()).await
    }

    /// Reads only the configured worker pool size.
    pub async fn worker_threads(&self) -> DbResult<usize> {
        let mut tx = self.store.read().await?;
        read_worker_threads(tx.as_mut()).await
    }

    /// Sets the global `enabled` flag.
    pub async fn set_enabled(&self, enabled: bool) -> DbResult<()> {
        let mut tx = self.store.write().await?;
        tx.put(schema::ENABLED_PATH, if enabled { "true" } else { "false" })
            .await?;
        tx.commit().await?;
        info!(enabled, "Map cache enabled flag updated");
        Ok(())
    }

    /// Sets the worker pool size (takes effect on next start).
    pub async fn set_worker_threads(&self, count: usize) -> DbResult<()> {
        validate_worker_threads(count)?;
        let mut tx = self.store.write().await?;
        tx.put(schema::WORKER_THREADS_PATH, &count.to_string()).await?;
        tx.commit().await?;
        info!(count, "Worker thread count updated");
        Ok(())
    }

    // =========================================================================
    // Mapping Definitions
    // =========================================================================

    /// Reads every mapping with its device bindings, in one transaction.
    pub async fn definitions(&self) -> DbResult<Vec<MappingDefinition>> {
        let mut tx = self.store.read().await?;
        let tx = tx.as_mut();

        let mut definitions = Vec::new();
        for (key_path, key_selector) in tx.select(schema::ALL_MAPPING_KEYS).await? {
            let Some(container) = parent_path(&key_path).map(str::to_string) else {
                continue;
            };

            let Some(value_selector) = tx.get(&leaf(&container, schema::VALUE_XPATH)).await? else {
                warn!(mapping = %container, "Mapping has no value-xpath, skipping");
                continue;
            };

            let update_interval_secs =
                read_interval(tx, &leaf(&container, schema::UPDATE_INTERVAL))
                    .await?
                    .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);

            let devices_selector = format!("{}/device/{}", container, schema::DEVICE_NAME);
            let mut devices = Vec::new();
            for (name_path, device) in tx.select(&devices_selector).await? {
                let Some(device_container) = parent_path(&name_path).map(str::to_string) else {
                    continue;
                };
                let update_interval_override =
                    read_interval(tx, &leaf(&device_container, schema::UPDATE_INTERVAL)).await?;
                let stats = leaf(&device_container, schema::LAST_POLL_STATS);
                let last_start = read_start(tx, &leaf(&stats, schema::START_TIMESTAMP)).await?;

                devices.push(DeviceBinding {
                    device,
                    update_interval_override,
                    last_start,
                });
            }

            definitions.push(MappingDefinition {
                mapping: MappingKey::new(key_selector, value_selector),
                update_interval_secs,
                devices,
            });
        }

        debug!(count = definitions.len(), "Loaded mapping definitions");
        Ok(definitions)
    }

    /// Every (mapping, device) binding with its scheduling state.
    pub async fn bindings(&self) -> DbResult<Vec<BindingState>> {
        let definitions = self.definitions().await?;
        Ok(definitions
            .iter()
            .flat_map(MappingDefinition::binding_states)
            .collect())
    }

    /// Creates a mapping or updates its interval.
    ///
    /// ## Arguments
    /// * `mapping` - Selector pair; must address sibling leaves
    /// * `update_interval` - Seconds; `None` keeps the current value
    ///   (or sets the default for a new mapping)
    pub async fn upsert_mapping(&self, mapping: &MappingKey, update_interval: Option<u64>) -> DbResult<()> {
        mapping.validate()?;
        validate_list_key("key-xpath", &mapping.key_selector)?;
        validate_list_key("value-xpath", &mapping.value_selector)?;
        if let Some(secs) = update_interval {
            validate_update_interval(secs)?;
        }

        let container = schema::mapping_path(mapping);
        let mut tx = self.store.write().await?;
        let interval_path = leaf(&container, schema::UPDATE_INTERVAL);

        tx.put(&leaf(&container, schema::KEY_XPATH), &mapping.key_selector)
            .await?;
        tx.put(&leaf(&container, schema::VALUE_XPATH), &mapping.value_selector)
            .await?;
        let interval = match update_interval {
            Some(secs) => Some(secs),
            None => {
                let configured = tx.exists(&interval_path).await?;
                (!configured).then_some(DEFAULT_UPDATE_INTERVAL_SECS)
            }
        };
        if let Some(secs) = interval {
            tx.put(&interval_path, &secs.to_string()).await?;
        }
        tx.commit().await?;

        info!(mapping = %mapping, "Mapping saved");
        Ok(())
    }

    /// Binds a device to an existing mapping.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - the mapping does not exist
    pub async fn add_device(
        &self,
        mapping: &MappingKey,
        device: &str,
        update_interval_override: Option<u64>,
    ) -> DbResult<()> {
        validate_device(device)?;
        if let Some(secs) = update_interval_override {
            validate_update_interval(secs)?;
        }

        let target = SyncTarget::new(mapping.clone(), device);
        let mut tx = self.store.write().await?;

        if !tx.exists(&schema::mapping_path(mapping)).await? {
            return Err(DbError::not_found("mapping", mapping.to_string()));
        }

        let container = schema::device_path(&target);
        tx.put(&leaf(&container, schema::DEVICE_NAME), device).await?;
        let interval_path = leaf(&container, schema::UPDATE_INTERVAL);
        match update_interval_override {
            Some(secs) => tx.put(&interval_path, &secs.to_string()).await?,
            None => tx.delete(&interval_path).await?,
        }
        tx.commit().await?;

        info!(binding = %target, "Device bound to mapping");
        Ok(())
    }

    /// Removes a device binding with its cache table and stats.
    ///
    /// Returns false if the binding did not exist.
    pub async fn remove_device(&self, target: &SyncTarget) -> DbResult<bool> {
        self.remove_subtree(&schema::device_path(target)).await
    }

    /// Removes a mapping with all of its device bindings.
    ///
    /// Returns false if the mapping did not exist.
    pub async fn remove_mapping(&self, mapping: &MappingKey) -> DbResult<bool> {
        self.remove_subtree(&schema::mapping_path(mapping)).await
    }

    async fn remove_subtree(&self, path: &str) -> DbResult<bool> {
        let mut tx = self.store.write().await?;
        if !tx.exists(path).await? {
            return Ok(false);
        }
        tx.delete(path).await?;
        tx.commit().await?;
        info!(path = %path, "Removed");
        Ok(true)
    }

    // =========================================================================
    // Cache State
    // =========================================================================

    /// The cache table of one binding as `(key, value)` in insertion order.
    pub async fn cache_table(&self, target: &SyncTarget) -> DbResult<Vec<(String, String)>> {
        let mut tx = self.store.read().await?;
        let tx = tx.as_mut();

        let mut table = Vec::new();
        for (key_path, key) in tx.select(&schema::entry_keys_selector(target)).await? {
            let Some(value_path) = schema::sibling_path(&key_path, schema::ENTRY_VALUE) else {
                continue;
            };
            if let Some(value) = tx.get(&value_path).await? {
                table.push((key, value));
            }
        }
        Ok(table)
    }

    /// The last recorded poll statistics of one binding.
    pub async fn poll_stats(&self, target: &SyncTarget) -> DbResult<Option<PollStats>> {
        let mut tx = self.store.read().await?;
        let tx = tx.as_mut();
        let stats = schema::stats_path(target);

        let start_path = leaf(&stats, schema::START_TIMESTAMP);
        let Some(start) = tx.get(&start_path).await? else {
            return Ok(None);
        };
        let start_timestamp = parse_stored_timestamp(&start_path, &start)?;

        let end_path = leaf(&stats, schema::END_TIMESTAMP);
        let end_timestamp = match tx.get(&end_path).await? {
            Some(end) => parse_stored_timestamp(&end_path, &end)?,
            None => start_timestamp,
        };

        let duration = read_u64(tx, &leaf(&stats, schema::DURATION)).await?.unwrap_or(0);
        let entries_polled = read_u64(tx, &leaf(&stats, schema::ENTRIES_POLLED))
            .await?
            .unwrap_or(0);

        Ok(Some(PollStats {
            start_timestamp,
            end_timestamp,
            duration,
            entries_polled,
        }))
    }
}

impl std::fmt::Debug for MapCacheRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapCacheRepository").finish_non_exhaustive()
    }
}

// =============================================================================
// Leaf Readers
// =============================================================================

async fn read_enabled(tx: &mut dyn ReadTransaction) -> DbResult<bool> {
    match tx.get(schema::ENABLED_PATH).await? {
        None => Ok(false),
        Some(value) => match value.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(DbError::invalid_value(
                schema::ENABLED_PATH,
                format!("expected true or false, got '{}'", other),
            )),
        },
    }
}

async fn read_worker_threads(tx: &mut dyn ReadTransaction) -> DbResult<usize> {
    match read_u64(tx, schema::WORKER_THREADS_PATH).await? {
        None => Ok(DEFAULT_WORKER_THREADS),
        Some(count) => {
            let count = count as usize;
            validate_worker_threads(count)?;
            Ok(count)
        }
    }
}

async fn read_u64(tx: &mut dyn ReadTransaction, path: &str) -> DbResult<Option<u64>> {
    match tx.get(path).await? {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| DbError::invalid_value(path, e.to_string())),
    }
}

/// Reads an interval leaf; an unusable value is logged and treated as unset.
async fn read_interval(tx: &mut dyn ReadTransaction, path: &str) -> DbResult<Option<u64>> {
    match read_u64(tx, path).await {
        Ok(Some(secs)) if validate_update_interval(secs).is_ok() => Ok(Some(secs)),
        Ok(Some(secs)) => {
            warn!(path = %path, secs, "Update interval out of range, ignoring");
            Ok(None)
        }
        Ok(None) => Ok(None),
        Err(DbError::InvalidValue { reason, .. }) => {
            warn!(path = %path, reason = %reason, "Unreadable update interval, ignoring");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Reads a `start-timestamp`; an unparsable value counts as never polled.
async fn read_start(tx: &mut dyn ReadTransaction, path: &str) -> DbResult<Option<DateTime<Utc>>> {
    match tx.get(path).await? {
        None => Ok(None),
        Some(value) => match parse_timestamp(&value) {
            Ok(ts) => Ok(Some(ts)),
            Err(e) => {
                warn!(path = %path, error = %e, "Unparsable start-timestamp, treating as never polled");
                Ok(None)
            }
        },
    }
}

fn parse_stored_timestamp(path: &str, value: &str) -> DbResult<DateTime<Utc>> {
    parse_timestamp(value).map_err(|e| DbError::invalid_value(path, e.to_string()))
}
