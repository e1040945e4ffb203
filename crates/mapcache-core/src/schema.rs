//! # Store Schema
//!
//! Path builders for every node the map cache reads or writes.
//!
//! ## Layout
//! ```text
//! /map-cache
//! ├── enabled
//! ├── worker-threads
//! └── map[key-xpath=K][value-xpath=V]
//!     ├── key-xpath, value-xpath, update-interval
//!     └── device[name=D]
//!         ├── name, update-interval
//!         ├── entry[k=KEY]/{k, v}
//!         └── last-poll-stats/{start-timestamp, end-timestamp,
//!                              duration, entries-polled}
//!
//! /devices/device[name=D]/live-status/...   (source rows)
//! /high-availability/mode                   (optional)
//! ```

use crate::selector::{keyed_step, parent_path, quote};
use crate::types::{MappingKey, SyncTarget};

/// Root container of all map cache state.
pub const ROOT: &str = "/map-cache";

/// Global enable switch.
pub const ENABLED_PATH: &str = "/map-cache/enabled";

/// Worker pool size.
pub const WORKER_THREADS_PATH: &str = "/map-cache/worker-threads";

/// Current high-availability mode, when the store carries one.
pub const HA_MODE_PATH: &str = "/high-availability/mode";

/// Selector over the key-selector leaf of every mapping.
pub const ALL_MAPPING_KEYS: &str = "/map-cache/map/key-xpath";

/// Selector over the name leaf of every device binding.
pub const ALL_DEVICE_NAMES: &str = "/map-cache/map/device/name";

// Leaf names.
pub const KEY_XPATH: &str = "key-xpath";
pub const VALUE_XPATH: &str = "value-xpath";
pub const UPDATE_INTERVAL: &str = "update-interval";
pub const DEVICE_NAME: &str = "name";
pub const ENTRY_KEY: &str = "k";
pub const ENTRY_VALUE: &str = "v";
pub const LAST_POLL_STATS: &str = "last-poll-stats";
pub const START_TIMESTAMP: &str = "start-timestamp";
pub const END_TIMESTAMP: &str = "end-timestamp";
pub const DURATION: &str = "duration";
pub const ENTRIES_POLLED: &str = "entries-polled";

// =============================================================================
// Map Cache Paths
// =============================================================================

/// `/map-cache/map[key-xpath=K][value-xpath=V]`
pub fn mapping_path(mapping: &MappingKey) -> String {
    format!(
        "{}/map[{}={}][{}={}]",
        ROOT,
        KEY_XPATH,
        quote(&mapping.key_selector),
        VALUE_XPATH,
        quote(&mapping.value_selector)
    )
}

/// `/map-cache/map[...]/device[name=D]`
pub fn device_path(target: &SyncTarget) -> String {
    format!(
        "{}/{}",
        mapping_path(&target.mapping),
        keyed_step("device", DEVICE_NAME, &target.device)
    )
}

/// `/map-cache/map[...]/device[name=D]/entry[k=KEY]`
pub fn entry_path(target: &SyncTarget, key: &str) -> String {
    format!(
        "{}/{}",
        device_path(target),
        keyed_step("entry", ENTRY_KEY, key)
    )
}

/// Selector over the key leaf of every cached entry of a binding.
pub fn entry_keys_selector(target: &SyncTarget) -> String {
    format!("{}/entry/{}", device_path(target), ENTRY_KEY)
}

/// `/map-cache/map[...]/device[name=D]/last-poll-stats`
pub fn stats_path(target: &SyncTarget) -> String {
    format!("{}/{}", device_path(target), LAST_POLL_STATS)
}

/// Joins a container path and a leaf name.
pub fn leaf(container: &str, name: &str) -> String {
    format!("{}/{}", container, name)
}

// =============================================================================
// Source Paths
// =============================================================================

/// `/devices/device[name=D]/live-status`
pub fn live_status_root(device: &str) -> String {
    format!("/devices/{}/live-status", keyed_step("device", "name", device))
}

/// Full selector of the source key leaves for a binding.
pub fn source_key_selector(target: &SyncTarget) -> String {
    format!(
        "{}{}",
        live_status_root(&target.device),
        target.mapping.key_path()
    )
}

/// Path of the sibling leaf `name` next to the leaf at `leaf_path`.
///
/// ```rust
/// use mapcache_core::schema::sibling_path;
///
/// assert_eq!(
///     sibling_path("/t/row[id='1/2']/k", "v").as_deref(),
///     Some("/t/row[id='1/2']/v")
/// );
/// ```
pub fn sibling_path(leaf_path: &str, name: &str) -> Option<String> {
    parent_path(leaf_path).map(|parent| leaf(parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SyncTarget {
        SyncTarget::new(
            MappingKey::new("/if/interface/name", "/if/interface/mtu"),
            "r1",
        )
    }

    #[test]
    fn test_device_path_layout() {
        assert_eq!(
            device_path(&target()),
            "/map-cache/map[key-xpath='/if/interface/name'][value-xpath='/if/interface/mtu']/device[name='r1']"
        );
    }

    #[test]
    fn test_entry_path_quotes_apostrophes() {
        let path = entry_path(&target(), "it's");
        assert!(path.ends_with("/entry[k=\"it's\"]"));
    }

    #[test]
    fn test_source_selector_normalizes_leading_slash() {
        let relative = SyncTarget::new(MappingKey::new("if/interface/name", "if/interface/mtu"), "r1");
        assert_eq!(
            source_key_selector(&relative),
            "/devices/device[name='r1']/live-status/if/interface/name"
        );
        assert_eq!(source_key_selector(&relative), source_key_selector(&target()));
    }

    #[test]
    fn test_stats_path() {
        assert!(leaf(&stats_path(&target()), DURATION).ends_with("/last-poll-stats/duration"));
    }
}
