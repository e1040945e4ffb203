//! # mapcache-db: Data Store Layer for the Map Cache
//!
//! The transactional store interface the map cache core consumes, the two
//! stores shipped with it, and typed configuration access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Map Cache Data Flow                              │
//! │                                                                         │
//! │  CacheSynchronizer / Scheduler (mapcache-sync)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   mapcache-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  DataStore    │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │  (store.rs)   │◄───│ (map_cache)   │    │  (embedded)  │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │     ┌─────┴──────┐                                             │   │
//! │  │     ▼            ▼                                             │   │
//! │  │  Database     MemoryStore                                      │   │
//! │  │  (pool.rs)    (memory.rs)                                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) - nodes(seq, path, value)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - DataStore / ReadTransaction / WriteTransaction traits
//! - [`pool`] - SQLite pool configuration and the SQLite-backed store
//! - [`memory`] - In-memory store
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Data store error types
//! - [`repository`] - MapCacheRepository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mapcache_db::{Database, DbConfig, MapCacheRepository};
//!
//! let db = Database::new(DbConfig::new("mapcache.db")).await?;
//! let repo = MapCacheRepository::new(Arc::new(db));
//!
//! let settings = repo.settings().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use pool::{Database, DbConfig};
pub use store::{DataStore, ReadTransaction, SharedStore, StoreFuture, WriteTransaction};

pub use repository::map_cache::{DeviceBinding, MapCacheRepository, MappingDefinition};
