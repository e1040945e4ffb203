//! # Repository Module
//!
//! Typed access to the map cache subtree of the store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Scheduler / daemon                                                    │
//! │       │                                                                 │
//! │       │  repo.bindings()                                               │
//! │       ▼                                                                 │
//! │  MapCacheRepository                                                    │
//! │  ├── settings / set_enabled / set_worker_threads                       │
//! │  ├── definitions / bindings                                            │
//! │  ├── upsert_mapping / add_device / remove_device / remove_mapping      │
//! │  └── cache_table / poll_stats                                          │
//! │       │                                                                 │
//! │       │  select / get / put / delete                                   │
//! │       ▼                                                                 │
//! │  Arc<dyn DataStore>  (SQLite or memory)                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod map_cache;
