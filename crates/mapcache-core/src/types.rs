//! # Domain Types
//!
//! Core domain types used throughout the map cache.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   MappingKey    │   │   SyncTarget    │   │      Job        │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  key_selector   │──►│  mapping        │──►│  priority       │       │
//! │  │  value_selector │   │  device         │   │  target         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   PollStats     │   │    Snapshot     │   │  BindingState   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  start / end    │   │  key → value    │   │  target         │       │
//! │  │  duration (×100)│   │  (source order) │   │  interval       │       │
//! │  │  entries_polled │   │                 │   │  last_start     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::selector::{last_step, parent_path, Selector};
use crate::time::{duration_units, is_due};
use crate::DEFAULT_WORKER_THREADS;

// =============================================================================
// Mapping Key
// =============================================================================

/// Identity of a mapping definition: the (key-selector, value-selector) pair.
///
/// Selectors are relative to a device's live state. A leading `/` is
/// optional; `if/interface/name` and `/if/interface/name` are the same
/// selector once normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingKey {
    /// Selector of the leaf whose value becomes the cache key.
    pub key_selector: String,

    /// Selector of the sibling leaf whose value becomes the cache value.
    pub value_selector: String,
}

impl MappingKey {
    /// Creates a mapping key. Call [`MappingKey::validate`] before use.
    pub fn new(key_selector: impl Into<String>, value_selector: impl Into<String>) -> Self {
        MappingKey {
            key_selector: key_selector.into(),
            value_selector: value_selector.into(),
        }
    }

    /// Checks that key and value address sibling leaves of the same table.
    ///
    /// ## Rules
    /// - Both selectors parse
    /// - Both end in a plain leaf step (no predicates)
    /// - Everything before the leaf step is identical
    pub fn validate(&self) -> CoreResult<()> {
        let key = normalize(&self.key_selector);
        let value = normalize(&self.value_selector);

        let fail = |reason: &str| {
            CoreError::invalid_mapping(&self.key_selector, &self.value_selector, reason)
        };

        Selector::parse(&key).map_err(|e| fail(&e.to_string()))?;
        Selector::parse(&value).map_err(|e| fail(&e.to_string()))?;

        for leaf in [last_step(&key), last_step(&value)] {
            match leaf {
                Some(step) if !step.contains('[') => {}
                _ => return Err(fail("selectors must end in a leaf step")),
            }
        }

        if parent_path(&key) != parent_path(&value) {
            return Err(fail("key and value are not in the same table"));
        }

        Ok(())
    }

    /// Key selector with exactly one leading `/`.
    pub fn key_path(&self) -> String {
        normalize(&self.key_selector)
    }

    /// Name of the value leaf (last step of the value selector).
    pub fn value_leaf(&self) -> Option<String> {
        let value = normalize(&self.value_selector);
        last_step(&value).map(str::to_string)
    }
}

fn normalize(selector: &str) -> String {
    format!("/{}", selector.trim().trim_start_matches('/'))
}

impl std::fmt::Display for MappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.key_selector, self.value_selector)
    }
}

// =============================================================================
// Sync Target
// =============================================================================

/// One (mapping, device) pair: the unit of scheduling and synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncTarget {
    pub mapping: MappingKey,
    pub device: String,
}

impl SyncTarget {
    pub fn new(mapping: MappingKey, device: impl Into<String>) -> Self {
        SyncTarget {
            mapping,
            device: device.into(),
        }
    }
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.mapping, self.device)
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Job priority. Lower values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobPriority(u8);

impl JobPriority {
    /// Reserved for imperative refresh requests routed through the queue.
    pub const ON_DEMAND: JobPriority = JobPriority(0);

    /// Priority of every job the periodic scheduler enqueues.
    pub const PERIODIC: JobPriority = JobPriority(1);

    #[inline]
    pub const fn new(value: u8) -> Self {
        JobPriority(value)
    }

    #[inline]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queued synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub priority: JobPriority,
    pub target: SyncTarget,
}

impl Job {
    pub fn new(priority: JobPriority, target: SyncTarget) -> Self {
        Job { priority, target }
    }

    /// Shorthand for a scheduler-originated job.
    pub fn periodic(target: SyncTarget) -> Self {
        Job::new(JobPriority::PERIODIC, target)
    }
}

// =============================================================================
// Poll Statistics
// =============================================================================

/// Statistics of the last successful synchronization of one binding.
///
/// Timestamps are held at whole-second precision, which is what the stored
/// text format can represent. `duration` is computed from the precise
/// window before truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStats {
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    /// Elapsed time in units of 1/100 s.
    pub duration: u64,
    pub entries_polled: u64,
}

impl PollStats {
    /// Builds stats for a fetch window.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, entries_polled: usize) -> Self {
        PollStats {
            start_timestamp: start.trunc_subsecs(0),
            end_timestamp: end.trunc_subsecs(0),
            duration: duration_units(&start, &end),
            entries_polled: entries_polled as u64,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Key/value pairs fetched in one consistent read, in source order.
///
/// A repeated key keeps its first position and takes the latest value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (k, v) in iter {
            snapshot.insert(k, v);
        }
        snapshot
    }
}

// =============================================================================
// Configuration Views
// =============================================================================

/// Global settings read from the data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCacheSettings {
    /// Master switch for periodic synchronization.
    pub enabled: bool,
    /// Size of the worker pool.
    pub worker_threads: usize,
}

impl Default for MapCacheSettings {
    fn default() -> Self {
        MapCacheSettings {
            enabled: false,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

/// What the scheduler needs to know about one (mapping, device) binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingState {
    pub target: SyncTarget,
    /// Effective interval: the device override, else the mapping default.
    pub update_interval_secs: u64,
    /// `start-timestamp` of the last successful poll, if any.
    pub last_start: Option<DateTime<Utc>>,
}

impl BindingState {
    /// Returns true if this binding should be enqueued at `now`.
    pub fn is_due(&self, now: &DateTime<Utc>) -> bool {
        is_due(self.last_start.as_ref(), self.update_interval_secs, now)
    }
}
